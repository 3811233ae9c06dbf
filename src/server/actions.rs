//! Built-in action handlers.

use crate::error::{Result, SmsError};
use crate::protocol::{actions, keys, text, Message};
use crate::services::{LoginAttempt, Role, Services, StudentRecord};

use super::dispatch::{Dispatcher, Outcome, RequestContext};

/// Register every built-in action on `dispatcher`.
pub fn register_all(dispatcher: &mut Dispatcher) {
    dispatcher
        .register_public(actions::LOGIN, login)
        .register(actions::LOGOUT, logout)
        .register(actions::CHANGE_PASSWORD, change_password)
        .register(actions::GET_STUDENT_INFO, get_student_info)
        .register(actions::GET_ALL_STUDENTS, get_all_students)
        .register(actions::SEARCH_STUDENTS, search_students)
        .register(actions::ADD_STUDENT, add_student)
        .register(actions::UPDATE_STUDENT, update_student)
        .register(actions::GET_ALL_COURSES, get_all_courses)
        .register(actions::GET_COURSE_INFO, get_course_info)
        .register(actions::GET_ENROLLMENTS, get_enrollments)
        .register(actions::GET_STUDENT_GRADES, get_student_grades);
    dispatcher.alias(actions::GET_COURSES, actions::GET_ALL_COURSES);
}

fn required_str<'a>(request: &'a Message, key: &str) -> Result<&'a str> {
    request
        .get_str(key)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| SmsError::InvalidMessage(format!("missing {key}")))
}

fn required_i64(request: &Message, key: &str) -> Result<i64> {
    request
        .get_i64(key)
        .ok_or_else(|| SmsError::InvalidMessage(format!("missing {key}")))
}

fn required_student(request: &Message) -> Result<StudentRecord> {
    request
        .get_as(keys::STUDENT)
        .ok_or_else(|| SmsError::InvalidMessage(format!("missing {}", keys::STUDENT)))
}

fn success_with<T: serde::Serialize + ?Sized>(request: &Message, key: &str, value: &T) -> Result<Outcome> {
    let mut response = Message::success_response(&request.action, text::SUCCESS);
    response.put(key, value)?;
    Ok(Outcome::reply(response))
}

fn failure(request: &Message, reason: &str) -> Result<Outcome> {
    Ok(Outcome::reply(Message::error_response(&request.action, reason)))
}

/// Student id the session may read: students are pinned to their own record,
/// staff must name one.
fn target_student_id(ctx: &RequestContext, services: &Services, request: &Message) -> Result<Option<i64>> {
    let user = ctx.require_user()?;
    match user.role {
        Role::Student => Ok(services
            .students
            .student_by_user_id(user.user_id)?
            .map(|s| s.student_id)),
        Role::Admin | Role::Teacher => required_i64(request, keys::STUDENT_ID).map(Some),
    }
}

fn login(ctx: &RequestContext, services: &Services, request: &Message) -> Result<Outcome> {
    let username = required_str(request, keys::USERNAME)?;
    let password = request
        .get_str(keys::PASSWORD)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| SmsError::InvalidMessage(format!("missing {}", keys::PASSWORD)))?;

    let identity = services.auth.authenticate(username, password)?;

    let attempt = LoginAttempt {
        username: username.to_string(),
        success: identity.is_some(),
        remote_addr: ctx.remote_addr.clone(),
    };
    if let Err(e) = services.audit.record_login(&attempt) {
        tracing::warn!(connection_id = %ctx.connection_id, "Failed to record login attempt: {}", e);
    }

    match identity {
        Some(identity) => {
            tracing::info!(
                connection_id = %ctx.connection_id,
                username = %identity.username,
                role = %identity.role,
                "User logged in"
            );
            let mut response = Message::success_response(&request.action, text::LOGIN_SUCCESS);
            response.put(keys::USER, &identity)?;
            Ok(Outcome::login(response, identity))
        },
        None => {
            tracing::warn!(connection_id = %ctx.connection_id, %username, "Failed login attempt");
            failure(request, text::INVALID_CREDENTIALS)
        },
    }
}

fn logout(ctx: &RequestContext, _: &Services, request: &Message) -> Result<Outcome> {
    if let Some(user) = &ctx.user {
        tracing::info!(connection_id = %ctx.connection_id, username = %user.username, "User logged out");
    }
    Ok(Outcome::logout(Message::success_response(
        &request.action,
        text::LOGOUT_SUCCESS,
    )))
}

fn change_password(ctx: &RequestContext, services: &Services, request: &Message) -> Result<Outcome> {
    let user = ctx.require_user()?;
    let password = request
        .get_str(keys::PASSWORD)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| SmsError::InvalidMessage(format!("missing {}", keys::PASSWORD)))?;

    if services.auth.change_password(user.user_id, password)? {
        tracing::info!(connection_id = %ctx.connection_id, username = %user.username, "Password changed");
        Ok(Outcome::reply(Message::success_response(
            &request.action,
            text::PASSWORD_CHANGED,
        )))
    } else {
        failure(request, text::PASSWORD_CHANGE_FAILED)
    }
}

fn get_student_info(ctx: &RequestContext, services: &Services, request: &Message) -> Result<Outcome> {
    let student = match target_student_id(ctx, services, request)? {
        Some(id) => services.students.student_by_id(id)?,
        None => None,
    };

    match student {
        Some(student) => success_with(request, keys::STUDENT, &student),
        None => failure(request, text::STUDENT_NOT_FOUND),
    }
}

fn get_all_students(_: &RequestContext, services: &Services, request: &Message) -> Result<Outcome> {
    let students = services.students.all_students()?;
    success_with(request, keys::STUDENTS, &students)
}

fn search_students(_: &RequestContext, services: &Services, request: &Message) -> Result<Outcome> {
    let keyword = required_str(request, keys::SEARCH_KEYWORD)?;
    let students = services.students.search_students(keyword)?;
    success_with(request, keys::STUDENTS, &students)
}

fn add_student(ctx: &RequestContext, services: &Services, request: &Message) -> Result<Outcome> {
    let student = services.students.add_student(required_student(request)?)?;
    tracing::info!(
        connection_id = %ctx.connection_id,
        student_id = student.student_id,
        student_code = %student.student_code,
        "Student added"
    );
    success_with(request, keys::STUDENT, &student)
}

fn update_student(ctx: &RequestContext, services: &Services, request: &Message) -> Result<Outcome> {
    let user = ctx.require_user()?;
    let submitted = required_student(request)?;

    let record = if user.role == Role::Student {
        let Some(mut own) = services.students.student_by_user_id(user.user_id)? else {
            return failure(request, text::STUDENT_NOT_FOUND);
        };
        if submitted.student_id != 0 && submitted.student_id != own.student_id {
            return Err(SmsError::Unauthorized(format!(
                "{} may only update their own record",
                user.username
            )));
        }
        own.apply_contact_fields(&submitted);
        own
    } else {
        submitted
    };

    let student_id = record.student_id;
    if services.students.update_student(record)? {
        tracing::info!(connection_id = %ctx.connection_id, student_id, "Student updated");
        Ok(Outcome::reply(Message::success_response(&request.action, text::SUCCESS)))
    } else {
        failure(request, text::STUDENT_NOT_FOUND)
    }
}

fn get_all_courses(_: &RequestContext, services: &Services, request: &Message) -> Result<Outcome> {
    let courses = services.courses.all_courses()?;
    success_with(request, keys::COURSES, &courses)
}

fn get_course_info(_: &RequestContext, services: &Services, request: &Message) -> Result<Outcome> {
    let course_id = required_i64(request, keys::COURSE_ID)?;
    match services.courses.course_by_id(course_id)? {
        Some(course) => success_with(request, keys::COURSE, &course),
        None => failure(request, text::COURSE_NOT_FOUND),
    }
}

fn get_enrollments(ctx: &RequestContext, services: &Services, request: &Message) -> Result<Outcome> {
    let Some(student_id) = target_student_id(ctx, services, request)? else {
        return failure(request, text::STUDENT_NOT_FOUND);
    };
    let enrollments = services.students.enrollments_for(student_id)?;
    success_with(request, keys::ENROLLMENTS, &enrollments)
}

fn get_student_grades(_: &RequestContext, _: &Services, request: &Message) -> Result<Outcome> {
    failure(request, text::FEATURE_IN_DEVELOPMENT)
}

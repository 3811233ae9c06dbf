//! Domain collaborators consulted by server sessions.
//!
//! The session layer never stores or validates domain data itself. It calls
//! into four synchronous collaborators:
//!
//! | Trait | Concern |
//! |-------|---------|
//! | [`AuthService`] | credentials, password changes, role permissions |
//! | [`AuditLog`] | login attempt trail |
//! | [`StudentDirectory`] | student records and enrollments |
//! | [`CourseCatalog`] | course records |
//!
//! Collaborators may block (database, file I/O) and are always invoked from
//! a blocking-capable thread, never on the async reactor. They must not do
//! network I/O back into the session layer.

mod memory;

pub use memory::{InMemoryStore, LoginRecord, SeedData, UserAccount, MIN_PASSWORD_LEN};

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::actions;

/// User role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    /// Full access
    Admin,
    /// Read access to students and courses
    Teacher,
    /// Access to own records only
    Student,
}

impl Role {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "ADMIN",
            Self::Teacher => "TEACHER",
            Self::Student => "STUDENT",
        }
    }

    /// Admin or teacher
    pub fn is_staff(&self) -> bool {
        matches!(self, Self::Admin | Self::Teacher)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authenticated principal attached to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    /// Account id
    pub user_id: i64,
    /// Login name
    pub username: String,
    /// Display name
    #[serde(default)]
    pub full_name: String,
    /// Role
    pub role: Role,
}

/// Student lifecycle status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[allow(missing_docs)]
pub enum StudentStatus {
    #[default]
    Active,
    Suspended,
    Graduated,
    Dropped,
}

/// Student record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRecord {
    /// Record id (assigned by the directory on insert)
    #[serde(default)]
    pub student_id: i64,
    /// Owning account, if the student can log in
    #[serde(default)]
    pub user_id: Option<i64>,
    /// Registration code, unique
    pub student_code: String,
    /// Display name
    pub full_name: String,
    /// Contact email
    #[serde(default)]
    pub email: Option<String>,
    /// Contact phone
    #[serde(default)]
    pub phone: Option<String>,
    /// Postal address
    #[serde(default)]
    pub address: Option<String>,
    /// Emergency contact name
    #[serde(default)]
    pub emergency_contact: Option<String>,
    /// Emergency contact phone
    #[serde(default)]
    pub emergency_phone: Option<String>,
    /// Department
    #[serde(default)]
    pub department_id: Option<i64>,
    /// Year of admission
    #[serde(default)]
    pub admission_year: i32,
    /// Status
    #[serde(default)]
    pub status: StudentStatus,
    /// Grade point average
    #[serde(default)]
    pub gpa: f64,
    /// Accumulated credits
    #[serde(default)]
    pub total_credits: i32,
}

impl StudentRecord {
    /// Copy the fields a student may edit on their own record.
    pub fn apply_contact_fields(&mut self, from: &StudentRecord) {
        self.email.clone_from(&from.email);
        self.phone.clone_from(&from.phone);
        self.address.clone_from(&from.address);
        self.emergency_contact.clone_from(&from.emergency_contact);
        self.emergency_phone.clone_from(&from.emergency_phone);
    }
}

/// Course lifecycle status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[allow(missing_docs)]
pub enum CourseStatus {
    #[default]
    Planning,
    Ongoing,
    Completed,
    Cancelled,
}

/// Course record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseRecord {
    /// Record id
    pub course_id: i64,
    /// Course code, e.g. `CS101-2024-1`
    pub course_code: String,
    /// Subject title
    pub subject_name: String,
    /// Credit weight
    #[serde(default)]
    pub credits: i32,
    /// Lecturer
    #[serde(default)]
    pub teacher_name: Option<String>,
    /// Academic year, e.g. `2024-2025`
    #[serde(default)]
    pub academic_year: String,
    /// Semester number
    #[serde(default)]
    pub semester: i32,
    /// Room
    #[serde(default)]
    pub room: Option<String>,
    /// Capacity
    #[serde(default)]
    pub max_students: i32,
    /// Current enrollment count
    #[serde(default)]
    pub current_students: i32,
    /// Status
    #[serde(default)]
    pub status: CourseStatus,
}

/// Enrollment status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[allow(missing_docs)]
pub enum EnrollmentStatus {
    #[default]
    Enrolled,
    Completed,
    Dropped,
    Failed,
}

/// A student's enrollment in a course.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentRecord {
    /// Record id
    pub enrollment_id: i64,
    /// Enrolled student
    pub student_id: i64,
    /// Course
    pub course_id: i64,
    /// Denormalized course code
    #[serde(default)]
    pub course_code: String,
    /// Denormalized subject title
    #[serde(default)]
    pub subject_name: String,
    /// Status
    #[serde(default)]
    pub status: EnrollmentStatus,
    /// Final numeric grade
    #[serde(default)]
    pub final_grade: Option<f64>,
    /// Letter grade
    #[serde(default)]
    pub letter_grade: Option<String>,
}

/// One login attempt, as handed to the audit log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginAttempt {
    /// Username as submitted
    pub username: String,
    /// Whether authentication succeeded
    pub success: bool,
    /// Remote endpoint of the session
    pub remote_addr: String,
}

/// Collaborator failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    /// Backing store failed.
    #[error("storage failure: {0}")]
    Storage(String),

    /// Referenced record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Input rejected by domain validation.
    #[error("invalid input: {0}")]
    Invalid(String),

    /// Input conflicts with an existing record.
    #[error("conflict: {0}")]
    Conflict(String),
}

/// Result alias for collaborator calls
pub type CollaboratorResult<T> = std::result::Result<T, CollaboratorError>;

/// Credential verification and permissions.
pub trait AuthService: Send + Sync {
    /// Verify credentials. `Ok(None)` means the credentials were rejected.
    fn authenticate(&self, username: &str, password: &str) -> CollaboratorResult<Option<Identity>>;

    /// Replace the password of `user_id`. `Ok(false)` means the change was refused.
    fn change_password(&self, user_id: i64, new_password: &str) -> CollaboratorResult<bool>;

    /// Whether `identity` may invoke `action`.
    ///
    /// Admins may do everything. Teachers may read and search. Students may
    /// read their own records and the course catalog, and edit their own
    /// contact fields.
    fn permits(&self, identity: &Identity, action: &str) -> bool {
        match action {
            actions::LOGIN | actions::LOGOUT | actions::CHANGE_PASSWORD => true,
            _ => match identity.role {
                Role::Admin => true,
                Role::Teacher => action.starts_with("GET_") || action.starts_with("SEARCH_"),
                Role::Student => matches!(
                    action,
                    actions::GET_STUDENT_INFO
                        | actions::GET_ALL_COURSES
                        | actions::GET_COURSES
                        | actions::GET_COURSE_INFO
                        | actions::GET_ENROLLMENTS
                        | actions::UPDATE_STUDENT
                ),
            },
        }
    }
}

/// Login audit trail.
pub trait AuditLog: Send + Sync {
    /// Record one login attempt.
    fn record_login(&self, attempt: &LoginAttempt) -> CollaboratorResult<()>;
}

/// Student records.
pub trait StudentDirectory: Send + Sync {
    /// Every student.
    fn all_students(&self) -> CollaboratorResult<Vec<StudentRecord>>;

    /// Student by record id.
    fn student_by_id(&self, student_id: i64) -> CollaboratorResult<Option<StudentRecord>>;

    /// Student owned by an account.
    fn student_by_user_id(&self, user_id: i64) -> CollaboratorResult<Option<StudentRecord>>;

    /// Keyword search over name, code and email.
    fn search_students(&self, keyword: &str) -> CollaboratorResult<Vec<StudentRecord>>;

    /// Insert a student; returns the stored record with its assigned id.
    fn add_student(&self, student: StudentRecord) -> CollaboratorResult<StudentRecord>;

    /// Replace a student record. `Ok(false)` if no record has that id.
    fn update_student(&self, student: StudentRecord) -> CollaboratorResult<bool>;

    /// Enrollments of one student.
    fn enrollments_for(&self, student_id: i64) -> CollaboratorResult<Vec<EnrollmentRecord>>;
}

/// Course records.
pub trait CourseCatalog: Send + Sync {
    /// Every course.
    fn all_courses(&self) -> CollaboratorResult<Vec<CourseRecord>>;

    /// Course by id.
    fn course_by_id(&self, course_id: i64) -> CollaboratorResult<Option<CourseRecord>>;
}

/// The collaborator set a server dispatches into.
#[derive(Clone)]
pub struct Services {
    /// Authentication
    pub auth: Arc<dyn AuthService>,
    /// Audit
    pub audit: Arc<dyn AuditLog>,
    /// Students
    pub students: Arc<dyn StudentDirectory>,
    /// Courses
    pub courses: Arc<dyn CourseCatalog>,
}

impl Services {
    /// All four collaborators backed by one store.
    pub fn from_store(store: Arc<InMemoryStore>) -> Self {
        Self {
            auth: store.clone(),
            audit: store.clone(),
            students: store.clone(),
            courses: store,
        }
    }

    /// Collaborators backed by the built-in demo data set.
    pub fn in_memory() -> Self {
        Self::from_store(Arc::new(InMemoryStore::demo()))
    }
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Services").finish_non_exhaustive()
    }
}

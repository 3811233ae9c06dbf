//! In-memory collaborator store.
//!
//! Backs all four collaborator traits with process-local maps. Data can be
//! seeded from a TOML file:
//!
//! ```toml
//! [[users]]
//! user_id = 1
//! username = "admin"
//! password = "admin123"
//! full_name = "Administrator"
//! role = "ADMIN"
//!
//! [[students]]
//! studentId = 1
//! userId = 3
//! studentCode = "SV001"
//! fullName = "An Nguyen"
//!
//! [[courses]]
//! courseId = 1
//! courseCode = "CS101-2024-1"
//! subjectName = "Introduction to Programming"
//! ```
//!
//! Record tables use the same camelCase keys as the wire format.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use super::{
    AuditLog, AuthService, CollaboratorError, CollaboratorResult, CourseCatalog, CourseRecord,
    CourseStatus, EnrollmentRecord, EnrollmentStatus, Identity, LoginAttempt, Role,
    StudentDirectory, StudentRecord, StudentStatus,
};
use crate::error::{Result, SmsError};

/// Minimum accepted password length
pub const MIN_PASSWORD_LEN: usize = 6;

/// Login account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    /// Account id
    pub user_id: i64,
    /// Login name, unique
    pub username: String,
    /// Password
    pub password: String,
    /// Display name
    #[serde(default)]
    pub full_name: String,
    /// Role
    pub role: Role,
    /// Disabled accounts cannot log in
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl UserAccount {
    fn identity(&self) -> Identity {
        Identity {
            user_id: self.user_id,
            username: self.username.clone(),
            full_name: self.full_name.clone(),
            role: self.role,
        }
    }
}

/// Seed file contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeedData {
    /// Accounts
    #[serde(default)]
    pub users: Vec<UserAccount>,
    /// Students
    #[serde(default)]
    pub students: Vec<StudentRecord>,
    /// Courses
    #[serde(default)]
    pub courses: Vec<CourseRecord>,
    /// Enrollments
    #[serde(default)]
    pub enrollments: Vec<EnrollmentRecord>,
}

/// One audited login attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRecord {
    /// Username as submitted
    pub username: String,
    /// Outcome
    pub success: bool,
    /// Remote endpoint
    pub remote_addr: String,
    /// When the attempt was recorded
    pub at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Tables {
    users: HashMap<String, UserAccount>,
    students: BTreeMap<i64, StudentRecord>,
    courses: BTreeMap<i64, CourseRecord>,
    enrollments: Vec<EnrollmentRecord>,
}

/// Process-local implementation of every collaborator trait.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    logins: Mutex<Vec<LoginRecord>>,
}

impl InMemoryStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store populated from seed data
    pub fn from_seed(seed: SeedData) -> Self {
        let tables = Tables {
            users: seed
                .users
                .into_iter()
                .map(|u| (u.username.clone(), u))
                .collect(),
            students: seed
                .students
                .into_iter()
                .map(|s| (s.student_id, s))
                .collect(),
            courses: seed.courses.into_iter().map(|c| (c.course_id, c)).collect(),
            enrollments: seed.enrollments,
        };

        Self {
            tables: RwLock::new(tables),
            logins: Mutex::new(Vec::new()),
        }
    }

    /// Store populated from a TOML seed file
    pub fn from_seed_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SmsError::Config(format!("Failed to read seed file {}: {e}", path.display()))
        })?;
        let seed: SeedData = toml::from_str(&content)?;

        tracing::info!(
            users = seed.users.len(),
            students = seed.students.len(),
            courses = seed.courses.len(),
            "Loaded seed data from {}",
            path.display()
        );
        Ok(Self::from_seed(seed))
    }

    /// Small built-in data set: one admin, one teacher, two students, three courses.
    pub fn demo() -> Self {
        let user = |user_id, username: &str, password: &str, full_name: &str, role| UserAccount {
            user_id,
            username: username.to_string(),
            password: password.to_string(),
            full_name: full_name.to_string(),
            role,
            active: true,
        };
        let student = |student_id, user_id, code: &str, name: &str, email: &str| StudentRecord {
            student_id,
            user_id: Some(user_id),
            student_code: code.to_string(),
            full_name: name.to_string(),
            email: Some(email.to_string()),
            phone: None,
            address: None,
            emergency_contact: None,
            emergency_phone: None,
            department_id: Some(1),
            admission_year: 2023,
            status: StudentStatus::Active,
            gpa: 0.0,
            total_credits: 0,
        };
        let course = |course_id, code: &str, subject: &str, credits, teacher: &str| CourseRecord {
            course_id,
            course_code: code.to_string(),
            subject_name: subject.to_string(),
            credits,
            teacher_name: Some(teacher.to_string()),
            academic_year: "2024-2025".to_string(),
            semester: 1,
            room: None,
            max_students: 50,
            current_students: 0,
            status: CourseStatus::Ongoing,
        };
        let enrollment = |enrollment_id, student_id, c: &CourseRecord| EnrollmentRecord {
            enrollment_id,
            student_id,
            course_id: c.course_id,
            course_code: c.course_code.clone(),
            subject_name: c.subject_name.clone(),
            status: EnrollmentStatus::Enrolled,
            final_grade: None,
            letter_grade: None,
        };

        let courses = vec![
            course(1, "CS101-2024-1", "Introduction to Programming", 3, "Binh Tran"),
            course(2, "CS201-2024-1", "Data Structures", 4, "Binh Tran"),
            course(3, "MA101-2024-1", "Calculus I", 3, "Chi Le"),
        ];
        let enrollments = vec![
            enrollment(1, 1, &courses[0]),
            enrollment(2, 1, &courses[2]),
            enrollment(3, 2, &courses[1]),
        ];

        Self::from_seed(SeedData {
            users: vec![
                user(1, "admin", "admin123", "Administrator", Role::Admin),
                user(2, "teacher1", "teacher123", "Binh Tran", Role::Teacher),
                user(3, "student1", "student123", "An Nguyen", Role::Student),
                user(4, "student2", "student123", "Dung Pham", Role::Student),
            ],
            students: vec![
                student(1, 3, "SV001", "An Nguyen", "an.nguyen@example.edu"),
                student(2, 4, "SV002", "Dung Pham", "dung.pham@example.edu"),
            ],
            courses,
            enrollments,
        })
    }

    /// Add or replace an account
    pub fn add_user(&self, account: UserAccount) {
        self.tables
            .write()
            .users
            .insert(account.username.clone(), account);
    }

    /// Snapshot of the login audit trail, oldest first
    pub fn login_history(&self) -> Vec<LoginRecord> {
        self.logins.lock().clone()
    }
}

impl AuthService for InMemoryStore {
    fn authenticate(&self, username: &str, password: &str) -> CollaboratorResult<Option<Identity>> {
        let tables = self.tables.read();
        Ok(tables
            .users
            .get(username)
            .filter(|u| u.active && u.password == password)
            .map(UserAccount::identity))
    }

    fn change_password(&self, user_id: i64, new_password: &str) -> CollaboratorResult<bool> {
        if new_password.chars().count() < MIN_PASSWORD_LEN {
            return Ok(false);
        }

        let mut tables = self.tables.write();
        match tables.users.values_mut().find(|u| u.user_id == user_id) {
            Some(account) => {
                account.password = new_password.to_string();
                Ok(true)
            },
            None => Ok(false),
        }
    }
}

impl AuditLog for InMemoryStore {
    fn record_login(&self, attempt: &LoginAttempt) -> CollaboratorResult<()> {
        self.logins.lock().push(LoginRecord {
            username: attempt.username.clone(),
            success: attempt.success,
            remote_addr: attempt.remote_addr.clone(),
            at: Utc::now(),
        });
        Ok(())
    }
}

impl StudentDirectory for InMemoryStore {
    fn all_students(&self) -> CollaboratorResult<Vec<StudentRecord>> {
        Ok(self.tables.read().students.values().cloned().collect())
    }

    fn student_by_id(&self, student_id: i64) -> CollaboratorResult<Option<StudentRecord>> {
        Ok(self.tables.read().students.get(&student_id).cloned())
    }

    fn student_by_user_id(&self, user_id: i64) -> CollaboratorResult<Option<StudentRecord>> {
        Ok(self
            .tables
            .read()
            .students
            .values()
            .find(|s| s.user_id == Some(user_id))
            .cloned())
    }

    fn search_students(&self, keyword: &str) -> CollaboratorResult<Vec<StudentRecord>> {
        let needle = keyword.trim().to_lowercase();
        let matches = |field: &str| field.to_lowercase().contains(&needle);

        Ok(self
            .tables
            .read()
            .students
            .values()
            .filter(|s| {
                matches(&s.full_name)
                    || matches(&s.student_code)
                    || s.email.as_deref().is_some_and(matches)
            })
            .cloned()
            .collect())
    }

    fn add_student(&self, mut student: StudentRecord) -> CollaboratorResult<StudentRecord> {
        if student.student_code.trim().is_empty() || student.full_name.trim().is_empty() {
            return Err(CollaboratorError::Invalid(
                "student code and full name are required".into(),
            ));
        }

        let mut tables = self.tables.write();
        if tables
            .students
            .values()
            .any(|s| s.student_code == student.student_code)
        {
            return Err(CollaboratorError::Conflict(format!(
                "student code {} already exists",
                student.student_code
            )));
        }

        student.student_id = tables.students.keys().next_back().map_or(1, |id| id + 1);
        tables.students.insert(student.student_id, student.clone());
        Ok(student)
    }

    fn update_student(&self, student: StudentRecord) -> CollaboratorResult<bool> {
        let mut tables = self.tables.write();
        if tables
            .students
            .values()
            .any(|s| s.student_code == student.student_code && s.student_id != student.student_id)
        {
            return Err(CollaboratorError::Conflict(format!(
                "student code {} already exists",
                student.student_code
            )));
        }

        match tables.students.get_mut(&student.student_id) {
            Some(existing) => {
                *existing = student;
                Ok(true)
            },
            None => Ok(false),
        }
    }

    fn enrollments_for(&self, student_id: i64) -> CollaboratorResult<Vec<EnrollmentRecord>> {
        Ok(self
            .tables
            .read()
            .enrollments
            .iter()
            .filter(|e| e.student_id == student_id)
            .cloned()
            .collect())
    }
}

impl CourseCatalog for InMemoryStore {
    fn all_courses(&self) -> CollaboratorResult<Vec<CourseRecord>> {
        Ok(self.tables.read().courses.values().cloned().collect())
    }

    fn course_by_id(&self, course_id: i64) -> CollaboratorResult<Option<CourseRecord>> {
        Ok(self.tables.read().courses.get(&course_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_authenticate() {
        let store = InMemoryStore::demo();

        let identity = store.authenticate("admin", "admin123").unwrap().unwrap();
        assert_eq!(identity.role, Role::Admin);
        assert_eq!(identity.user_id, 1);

        assert!(store.authenticate("admin", "wrong").unwrap().is_none());
        assert!(store.authenticate("nobody", "admin123").unwrap().is_none());
    }

    #[test]
    fn test_inactive_account_rejected() {
        let store = InMemoryStore::new();
        store.add_user(UserAccount {
            user_id: 9,
            username: "ghost".into(),
            password: "secret1".into(),
            full_name: String::new(),
            role: Role::Student,
            active: false,
        });

        assert!(store.authenticate("ghost", "secret1").unwrap().is_none());
    }

    #[test]
    fn test_change_password_min_length() {
        let store = InMemoryStore::demo();

        assert!(!store.change_password(3, "12345").unwrap());
        assert!(store.change_password(3, "123456").unwrap());
        assert!(store.authenticate("student1", "123456").unwrap().is_some());
        assert!(!store.change_password(999, "long-enough").unwrap());
    }

    #[test]
    fn test_search_students() {
        let store = InMemoryStore::demo();

        let found = store.search_students("nguyen").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].student_code, "SV001");

        let found = store.search_students("SV00").unwrap();
        assert_eq!(found.len(), 2);

        let found = store.search_students("example.edu").unwrap();
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn test_add_student_assigns_id_and_rejects_duplicates() {
        let store = InMemoryStore::demo();
        let mut record = store.student_by_id(1).unwrap().unwrap();
        record.student_code = "SV100".into();
        record.user_id = None;

        let stored = store.add_student(record.clone()).unwrap();
        assert_eq!(stored.student_id, 3);

        assert!(matches!(
            store.add_student(record),
            Err(CollaboratorError::Conflict(_))
        ));

        let mut blank = stored;
        blank.student_code = " ".into();
        assert!(matches!(
            store.add_student(blank),
            Err(CollaboratorError::Invalid(_))
        ));
    }

    #[test]
    fn test_update_student() {
        let store = InMemoryStore::demo();
        let mut record = store.student_by_user_id(3).unwrap().unwrap();
        record.phone = Some("0901".into());

        assert!(store.update_student(record.clone()).unwrap());
        assert_eq!(
            store.student_by_id(record.student_id).unwrap().unwrap().phone.as_deref(),
            Some("0901")
        );

        record.student_id = 42;
        record.student_code = "SV042".into();
        assert!(!store.update_student(record).unwrap());
    }

    #[test]
    fn test_enrollments_and_courses() {
        let store = InMemoryStore::demo();

        assert_eq!(store.enrollments_for(1).unwrap().len(), 2);
        assert!(store.enrollments_for(99).unwrap().is_empty());
        assert_eq!(store.all_courses().unwrap().len(), 3);
        assert_eq!(
            store.course_by_id(2).unwrap().unwrap().subject_name,
            "Data Structures"
        );
        assert!(store.course_by_id(99).unwrap().is_none());
    }

    #[test]
    fn test_login_history() {
        let store = InMemoryStore::demo();
        store
            .record_login(&LoginAttempt {
                username: "admin".into(),
                success: false,
                remote_addr: "127.0.0.1:50000".into(),
            })
            .unwrap();

        let history = store.login_history();
        assert_eq!(history.len(), 1);
        assert!(!history[0].success);
        assert_eq!(history[0].remote_addr, "127.0.0.1:50000");
    }

    #[test]
    fn test_seed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[[users]]
user_id = 7
username = "root"
password = "toor42"
role = "ADMIN"

[[students]]
studentId = 5
studentCode = "SV005"
fullName = "Em Vo"

[[courses]]
courseId = 11
courseCode = "PH101"
subjectName = "Physics"
"#
        )
        .unwrap();

        let store = InMemoryStore::from_seed_file(file.path()).unwrap();
        assert!(store.authenticate("root", "toor42").unwrap().is_some());
        assert_eq!(store.student_by_id(5).unwrap().unwrap().full_name, "Em Vo");
        assert_eq!(store.all_courses().unwrap().len(), 1);
    }

    #[test]
    fn test_seed_file_missing() {
        let err = InMemoryStore::from_seed_file("/nonexistent/seed.toml").unwrap_err();
        assert!(matches!(err, SmsError::Config(_)));
    }
}

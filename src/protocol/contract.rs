//! Wire contract: action names, payload keys and response texts.
//!
//! Every accepted action string together with its payload keys forms the
//! contract surface between client and server. Adding an action means adding
//! one constant here and one dispatch-table entry; framing is untouched.

/// Action identifiers.
pub mod actions {
    /// Authenticate the session (the only action allowed before login).
    pub const LOGIN: &str = "LOGIN";
    /// Clear the session identity.
    pub const LOGOUT: &str = "LOGOUT";
    /// Change the logged-in user's password.
    pub const CHANGE_PASSWORD: &str = "CHANGE_PASSWORD";

    /// Fetch one student record.
    pub const GET_STUDENT_INFO: &str = "GET_STUDENT_INFO";
    /// List every student.
    pub const GET_ALL_STUDENTS: &str = "GET_ALL_STUDENTS";
    /// Keyword search over students.
    pub const SEARCH_STUDENTS: &str = "SEARCH_STUDENTS";
    /// Create a student record.
    pub const ADD_STUDENT: &str = "ADD_STUDENT";
    /// Update a student record.
    pub const UPDATE_STUDENT: &str = "UPDATE_STUDENT";

    /// List every course.
    pub const GET_ALL_COURSES: &str = "GET_ALL_COURSES";
    /// Alias of [`GET_ALL_COURSES`].
    pub const GET_COURSES: &str = "GET_COURSES";
    /// Fetch one course.
    pub const GET_COURSE_INFO: &str = "GET_COURSE_INFO";

    /// List a student's enrollments.
    pub const GET_ENROLLMENTS: &str = "GET_ENROLLMENTS";
    /// A student's grades. Reserved; the server answers "feature in development".
    pub const GET_STUDENT_GRADES: &str = "GET_STUDENT_GRADES";

    /// Server-initiated operator broadcast (notification only).
    pub const BROADCAST: &str = "BROADCAST";
    /// Action used for responses to frames that could not be decoded.
    pub const ERROR: &str = "ERROR";
}

/// Payload keys.
pub mod keys {
    /// Per-request correlation identifier, echoed by the server.
    pub const CORRELATION_ID: &str = "correlationId";

    /// Authenticated identity.
    pub const USER: &str = "user";
    /// Login name.
    pub const USERNAME: &str = "username";
    /// Password (login and password change).
    pub const PASSWORD: &str = "password";

    /// A single student record.
    pub const STUDENT: &str = "student";
    /// A list of student records.
    pub const STUDENTS: &str = "students";
    /// Student identifier.
    pub const STUDENT_ID: &str = "studentId";
    /// Search keyword.
    pub const SEARCH_KEYWORD: &str = "searchKeyword";

    /// A single course record.
    pub const COURSE: &str = "course";
    /// A list of course records.
    pub const COURSES: &str = "courses";
    /// Course identifier.
    pub const COURSE_ID: &str = "courseId";

    /// A list of enrollment records.
    pub const ENROLLMENTS: &str = "enrollments";
}

/// Human-readable response texts. Diagnostic only; never parsed by logic.
pub mod text {
    /// Generic success.
    pub const SUCCESS: &str = "Operation successful";
    /// Login accepted.
    pub const LOGIN_SUCCESS: &str = "Login successful";
    /// Logout accepted.
    pub const LOGOUT_SUCCESS: &str = "Logout successful";
    /// Bad credentials.
    pub const INVALID_CREDENTIALS: &str = "Invalid username or password";
    /// Action attempted without the required identity or role.
    pub const UNAUTHORIZED: &str = "Unauthorized";
    /// Generic server-side failure.
    pub const SERVER_ERROR: &str = "Server error";
    /// Missing or malformed payload.
    pub const INVALID_DATA: &str = "Invalid data";
    /// Duplicate record.
    pub const DUPLICATE_DATA: &str = "Data already exists";
    /// Student lookup failed.
    pub const STUDENT_NOT_FOUND: &str = "Student not found";
    /// Course lookup failed.
    pub const COURSE_NOT_FOUND: &str = "Course not found";
    /// Password change accepted.
    pub const PASSWORD_CHANGED: &str = "Password changed";
    /// Password change rejected.
    pub const PASSWORD_CHANGE_FAILED: &str = "Password change failed";
    /// Action is known but not served yet.
    pub const FEATURE_IN_DEVELOPMENT: &str = "Feature in development";

    /// Client could not write the request.
    pub const SEND_FAILED: &str = "Failed to send request";
    /// Client gave up waiting.
    pub const TIMEOUT: &str = "Request timed out waiting for response";
    /// Transport dropped while a request was in flight.
    pub const CONNECTION_LOST: &str = "Connection lost";
    /// Session was disconnected locally while a request was in flight.
    pub const DISCONNECTED: &str = "Disconnected from server";

    /// Prefix for unknown-action errors.
    pub fn unknown_action(action: &str) -> String {
        format!("Unknown action: {action}")
    }
}

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::grading::model::{Credential, Student};

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct CredentialQuery {
    #[validate(length(min = 1, message = "course must not be empty"))]
    pub(crate) course: String,
    #[validate(email(message = "email must be a valid address"))]
    pub(crate) email: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct CredentialResponse {
    pub(crate) course: String,
    pub(crate) email: String,
    pub(crate) credentials: Credential,
}

impl CredentialResponse {
    pub(crate) fn new(course: String, student: Student) -> Self {
        Self { course, email: student.email, credentials: student.credentials }
    }
}

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::users::repo_types::{FindAllParams, PublicUser};
use crate::validation::{Rules, Validate};

pub const MIN_PASSWORD_LEN: usize = 6;

/// Request body for user registration.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateUserRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

impl Validate for CreateUserRequest {
    fn validate(&self) -> Result<(), AppError> {
        Rules::new()
            .required("name", &self.name)
            .required("email", &self.email)
            .email("email", &self.email)
            .required("password", &self.password)
            .min_len("password", &self.password, MIN_PASSWORD_LEN)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateUserRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
}

impl Validate for UpdateUserRequest {
    fn validate(&self) -> Result<(), AppError> {
        Rules::new()
            .required("name", &self.name)
            .required("email", &self.email)
            .email("email", &self.email)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    #[serde(default)]
    pub old_password: String,
    #[serde(default)]
    pub new_password: String,
}

impl Validate for ChangePasswordRequest {
    fn validate(&self) -> Result<(), AppError> {
        Rules::new()
            .required("oldPassword", &self.old_password)
            .required("newPassword", &self.new_password)
            .min_len("newPassword", &self.new_password, MIN_PASSWORD_LEN)
            .finish()
    }
}

/// Request body for login.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

impl Validate for LoginRequest {
    fn validate(&self) -> Result<(), AppError> {
        Rules::new()
            .required("email", &self.email)
            .required("password", &self.password)
            .finish()
    }
}

/// Session descriptor returned after login.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub session_id: String,
    pub user: PublicUser,
}

#[derive(Debug, Serialize)]
pub struct UserList {
    pub data: Vec<PublicUser>,
    pub count: usize,
}

/// `?page_size=&page_num=&search=` on the listing endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub page_size: Option<i64>,
    pub page_num: Option<i64>,
    pub search: Option<String>,
}

const DEFAULT_PAGE_SIZE: u32 = 10;
const DEFAULT_PAGE_NUM: u32 = 1;

impl ListQuery {
    pub fn into_params(self) -> FindAllParams {
        let limit = match self.page_size {
            Some(n) if n >= 0 => u32::try_from(n).unwrap_or(u32::MAX),
            _ => DEFAULT_PAGE_SIZE,
        };
        let page = match self.page_num {
            Some(n) if n >= 0 => u32::try_from(n).unwrap_or(u32::MAX),
            _ => DEFAULT_PAGE_NUM,
        };
        FindAllParams {
            email: None,
            search: self.search.filter(|s| !s.is_empty()),
            page,
            limit,
        }
    }
}

use lazy_static::lazy_static;
use regex::Regex;

pub const MAX_USER_NAME_LEN: usize = 32;
pub const MIN_PASSWORD_LEN: usize = 8;

lazy_static! {
    // Accounts are restricted to the campus mail domains.
    static ref EMAIL_RE: Regex =
        Regex::new(r"^[^@\s]+@(mail\.|alum\.)?utoronto\.ca$").unwrap();
    static ref USER_NAME_RE: Regex = Regex::new(r"^[a-zA-Z0-9]+$").unwrap();
    static ref NAME_RE: Regex = Regex::new(r"^[a-zA-Z]+$").unwrap();
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

pub fn is_valid_user_name(user_name: &str) -> bool {
    !user_name.is_empty()
        && user_name.len() <= MAX_USER_NAME_LEN
        && USER_NAME_RE.is_match(user_name)
}

pub fn is_valid_name(name: &str) -> bool {
    NAME_RE.is_match(name)
}

pub fn is_valid_password(password: &str) -> bool {
    password.len() >= MIN_PASSWORD_LEN
}

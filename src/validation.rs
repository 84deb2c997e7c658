use std::collections::BTreeMap;

use serde::Serialize;

pub const TITLE_MAX_CHARS: usize = 200;
pub const TEXT_MAX_CHARS: usize = 100_000;
pub const TAG_MAX_CHARS: usize = 30;
pub const SLUG_MAX_CHARS: usize = 50;
pub const USERNAME_MAX_CHARS: usize = 150;
pub const PASSWORD_MIN_CHARS: usize = 8;

/// Per-field validation messages, rendered inline by the client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(field: &str, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0.entry(field.to_string()).or_default().push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    pub fn into_result(self) -> Result<(), FieldErrors> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

pub fn check_question_title(title: &str, errors: &mut FieldErrors) {
    let title = title.trim();
    if title.is_empty() {
        errors.add("title", "Please write a question.");
        return;
    }
    if title.chars().count() > TITLE_MAX_CHARS {
        errors.add("title", format!("Ensure this value has at most {TITLE_MAX_CHARS} characters."));
    }
    if !title.ends_with('?') {
        errors.add("title", "That is not a question.");
    }
}

/// Body text. `required` is set for answers and comments.
pub fn check_text(text: &str, required: bool, errors: &mut FieldErrors) {
    if required && text.trim().is_empty() {
        errors.add("text", "This field is required.");
        return;
    }
    if text.chars().count() > TEXT_MAX_CHARS {
        errors.add("text", format!("Ensure this value has at most {TEXT_MAX_CHARS} characters."));
    }
}

/// Tag names are ASCII so that `slugify(name)` is never empty.
pub fn check_tag_name(name: &str, errors: &mut FieldErrors) {
    let name = name.trim();
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric()) {
        errors.add("name", "A tag has only letters or numbers.");
    } else if name.chars().count() > TAG_MAX_CHARS {
        errors.add("name", format!("Ensure this value has at most {TAG_MAX_CHARS} characters."));
    }
}

pub fn check_username(username: &str, errors: &mut FieldErrors) {
    if username.is_empty() || username.chars().count() > USERNAME_MAX_CHARS {
        errors.add("username", format!("Enter a username of 1 to {USERNAME_MAX_CHARS} characters."));
        return;
    }
    if !username.chars().all(|c| c.is_alphanumeric() || "@.+-_".contains(c)) {
        errors.add("username", "Letters, digits and @/./+/-/_ only.");
    }
}

pub fn check_email(email: &str, errors: &mut FieldErrors) {
    if email.is_empty() {
        return;
    }
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => {}
        _ => errors.add("email", "Enter a valid email address."),
    }
}

pub fn check_password(password: &str, errors: &mut FieldErrors) {
    if password.chars().count() < PASSWORD_MIN_CHARS {
        errors.add("password", format!("Use at least {PASSWORD_MIN_CHARS} characters."));
    }
}

/// Lowercase ASCII slug: alphanumerics and `_` kept, whitespace and `-` runs
/// collapse to one `-`, everything else dropped.
pub fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    let mut pending_dash = false;
    for c in value.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else if c.is_whitespace() || c == '-' {
            pending_dash = true;
        }
    }
    if slug.len() > SLUG_MAX_CHARS {
        slug.truncate(SLUG_MAX_CHARS);
        while slug.ends_with('-') {
            slug.pop();
        }
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;

    fn title_errors(title: &str) -> Vec<String> {
        let mut e = FieldErrors::new();
        check_question_title(title, &mut e);
        e.get("title").map(|v| v.to_vec()).unwrap_or_default()
    }

    #[test]
    fn titles_must_be_questions() {
        assert!(title_errors("What a question?").is_empty());
        assert_eq!(title_errors("   "), vec!["Please write a question."]);
        assert_eq!(title_errors("Statement."), vec!["That is not a question."]);
        let long = format!("{}?", "a".repeat(TITLE_MAX_CHARS));
        assert_eq!(title_errors(&long).len(), 1);
    }

    #[test]
    fn text_bounds() {
        let mut e = FieldErrors::new();
        check_text("", false, &mut e);
        assert!(e.is_empty());
        check_text(" ", true, &mut e);
        assert_eq!(e.get("text").unwrap(), ["This field is required."]);
        let mut e = FieldErrors::new();
        check_text(&"x".repeat(TEXT_MAX_CHARS + 1), false, &mut e);
        assert!(!e.is_empty());
    }

    #[test]
    fn tag_names_are_alphanumeric() {
        let mut e = FieldErrors::new();
        check_tag_name("rust2024", &mut e);
        assert!(e.is_empty());
        check_tag_name("c++", &mut e);
        assert_eq!(e.get("name").unwrap(), ["A tag has only letters or numbers."]);
    }

    #[test]
    fn non_ascii_tag_names_are_rejected() {
        for name in ["日本", "café"] {
            let mut e = FieldErrors::new();
            check_tag_name(name, &mut e);
            assert_eq!(e.get("name").unwrap(), ["A tag has only letters or numbers."], "{name}");
        }
    }

    #[test]
    fn slugify_matches_url_rules() {
        assert_eq!(slugify("What a question?"), "what-a-question");
        assert_eq!(slugify("  Hello -- World  "), "hello-world");
        assert_eq!(slugify("snake_case ok"), "snake_case-ok");
        assert_eq!(slugify("???"), "");
        let long = slugify(&"word ".repeat(30));
        assert!(long.len() <= SLUG_MAX_CHARS && !long.ends_with('-'));
    }

    #[test]
    fn usernames_and_emails() {
        let mut e = FieldErrors::new();
        check_username("user.name+1", &mut e);
        check_email("", &mut e);
        check_email("jf@example.com", &mut e);
        assert!(e.is_empty());
        check_username("bad name", &mut e);
        check_email("nope", &mut e);
        assert!(e.get("username").is_some());
        assert!(e.get("email").is_some());
    }
}

use crate::api::error::ControlledError;
use axum::http::StatusCode;

/// Extensions that can never be uploaded. The empty entry rejects extensionless names.
pub const NOT_ALLOWED_EXTENSIONS: &[&str] = &["", ".exe", ".msi", ".bat", ".sh"];

/// Extensions that get a derived thumbnail.
pub const IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png"];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ValidationError {
    pub code: &'static str,
    pub message: String,
}

impl From<ValidationError> for ControlledError {
    fn from(e: ValidationError) -> Self {
        let status = match e.code {
            "FILE_TOO_LARGE" => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::BAD_REQUEST,
        };
        ControlledError::warn(e.message).with_status(status)
    }
}

/// Splits `name.ext` into `("name", ".ext")`.
///
/// A leading dot is part of the name (`.bashrc` has no extension), matching how
/// the client names files.
pub fn split_extension(name_with_ext: &str) -> (&str, &str) {
    match name_with_ext.rfind('.') {
        Some(idx) if idx > 0 => name_with_ext.split_at(idx),
        _ => (name_with_ext, ""),
    }
}

pub fn is_image_extension(ext: &str) -> bool {
    let ext = ext.to_lowercase();
    IMAGE_EXTENSIONS.iter().any(|&allowed| allowed == ext)
}

/// Validates the encoded upload name against the length limit
pub fn validate_filename_length(
    encoded_name: &str,
    display_name: &str,
    max_len: usize,
) -> Result<(), ValidationError> {
    if encoded_name.chars().count() > max_len {
        return Err(ValidationError {
            code: "FILENAME_TOO_LONG",
            message: format!("File name is too long: {}", display_name),
        });
    }
    Ok(())
}

/// Validates the extension against the blocklist (case-insensitive)
pub fn validate_extension(ext: &str, display_name: &str) -> Result<(), ValidationError> {
    let ext = ext.to_lowercase();
    if NOT_ALLOWED_EXTENSIONS.iter().any(|&blocked| blocked == ext) {
        return Err(ValidationError {
            code: "EXTENSION_NOT_ALLOWED",
            message: format!("This file type cannot be uploaded: {}", display_name),
        });
    }
    Ok(())
}

/// Validates streamed size against maximum limit
pub fn validate_file_size(
    size: usize,
    max_size: usize,
    display_name: &str,
) -> Result<(), ValidationError> {
    if size > max_size {
        return Err(ValidationError {
            code: "FILE_TOO_LARGE",
            message: format!(
                "File exceeds the {} MB limit: {}",
                max_size / 1024 / 1024,
                display_name
            ),
        });
    }
    Ok(())
}

use anyhow::{Result, anyhow};
use validator::ValidateEmail;

pub fn validate_email_address(address: &str) -> Result<()> {
    if address.trim().is_empty() {
        return Err(anyhow!("Email address cannot be empty"));
    }

    if !address.validate_email() {
        return Err(anyhow!("Email address is not syntactically valid"));
    }

    Ok(())
}

pub fn validate_text_content(text: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(anyhow!("Text content cannot be empty"));
    }

    Ok(())
}

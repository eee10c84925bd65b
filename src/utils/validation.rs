use crate::error::{AppError, Result};
use regex::Regex;
use std::sync::OnceLock;

/// 以太坊地址格式校验
pub fn is_eth_address(address: &str) -> bool {
    static ETH_ADDRESS: OnceLock<Regex> = OnceLock::new();

    let pattern = ETH_ADDRESS.get_or_init(|| Regex::new(r"^0x[a-fA-F0-9]{40}$").unwrap());
    pattern.is_match(address)
}

/// 校验以太坊地址并返回详细错误信息
pub fn validate_eth_address(address: &str) -> Result<()> {
    if !is_eth_address(address) {
        return Err(AppError::Validation(format!(
            "Invalid address: {}",
            address
        )));
    }

    Ok(())
}

/// 邮箱验证工具函数（与Rainbow-blog一致）
pub fn validate_email_format(email: &str) -> Result<()> {
    if email.trim().is_empty() {
        return Err(AppError::Validation("Email must not be empty".to_string()));
    }

    if !validator::validate_email(email) {
        return Err(AppError::Validation(format!("Invalid email: {}", email)));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_checksummed_and_lowercase_addresses() {
        assert!(is_eth_address("0x24e5F44999c151f08609F8e27b2238c773C4D020"));
        assert!(is_eth_address("0x24e5f44999c151f08609f8e27b2238c773c4d020"));
    }

    #[test]
    fn rejects_malformed_addresses() {
        assert!(!is_eth_address("0x24e5"));
        assert!(!is_eth_address("24e5f44999c151f08609f8e27b2238c773c4d020"));
        assert!(!is_eth_address("0xZZe5f44999c151f08609f8e27b2238c773c4d020"));
        assert!(validate_eth_address("0x123").is_err());
    }

    #[test]
    fn validates_email_addresses() {
        assert!(validate_email_format("user@example.com").is_ok());
        assert!(validate_email_format("").is_err());
        assert!(validate_email_format("not-an-email").is_err());
    }
}

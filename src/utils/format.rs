pub const MAXIMUM_FRACTION_DIGITS: usize = 2;

/// 将 18 位精度的 wei 金额字符串格式化为可读的 MANA 数量
pub fn format_mana(mana: &str) -> String {
    let value: f64 = mana.trim().parse().unwrap_or(0.0);
    format!("{:.*}", MAXIMUM_FRACTION_DIGITS, value / 1e18)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_wei_amounts_with_two_decimals() {
        assert_eq!(format_mana("1500000000000000000"), "1.50");
        assert_eq!(format_mana("1000000000000000000000"), "1000.00");
        assert_eq!(format_mana("0"), "0.00");
    }

    #[test]
    fn falls_back_to_zero_on_garbage() {
        assert_eq!(format_mana(""), "0.00");
        assert_eq!(format_mana("not-a-number"), "0.00");
    }
}

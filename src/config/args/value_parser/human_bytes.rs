use byte_unit::Byte;
use std::str::FromStr;

use crate::config::{MAX_PART_SIZE, MIN_PART_SIZE};

const UNDER_MIN_VALUE: &str = "must be greater than or equal to 5MiB";
const OVER_MAX_VALUE: &str = "must be smaller than or equal to 5GiB";

pub fn check_human_bytes(value: &str) -> Result<String, String> {
    let result = Byte::from_str(value).map_err(|e| e.to_string())?;

    if result.as_u128() < MIN_PART_SIZE as u128 {
        return Err(UNDER_MIN_VALUE.to_string());
    }
    if result.as_u128() > MAX_PART_SIZE as u128 {
        return Err(OVER_MAX_VALUE.to_string());
    }

    Ok(value.to_string())
}

pub fn parse_human_bytes(value: &str) -> Result<u64, String> {
    check_human_bytes(value)?;

    let result = Byte::from_str(value).map_err(|e| e.to_string())?;
    result
        .as_u128()
        .try_into()
        .map_err(|_| OVER_MAX_VALUE.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_valid_value() {
        init_dummy_tracing_subscriber();

        check_human_bytes("5MiB").unwrap();
        check_human_bytes("5242880").unwrap();
        check_human_bytes("5GiB").unwrap();
        check_human_bytes("5368709120").unwrap();
        check_human_bytes("8MiB").unwrap();
    }

    #[test]
    fn check_invalid_value() {
        init_dummy_tracing_subscriber();

        assert!(check_human_bytes("524287a").is_err());
        assert!(check_human_bytes("5Zib").is_err());
    }

    #[test]
    fn check_under_min_value() {
        init_dummy_tracing_subscriber();

        let result = check_human_bytes("5242879");
        assert_eq!(result.unwrap_err(), UNDER_MIN_VALUE);

        let result = check_human_bytes("4MiB");
        assert_eq!(result.unwrap_err(), UNDER_MIN_VALUE);
    }

    #[test]
    fn check_over_max_value() {
        init_dummy_tracing_subscriber();

        let result = check_human_bytes("5368709121");
        assert_eq!(result.unwrap_err(), OVER_MAX_VALUE);

        let result = check_human_bytes("5Eib");
        assert_eq!(result.unwrap_err(), OVER_MAX_VALUE);
    }

    #[test]
    fn parse_valid_value() {
        init_dummy_tracing_subscriber();

        assert_eq!(8 * 1024 * 1024, parse_human_bytes("8MiB").unwrap());
        assert_eq!(5 * 1024 * 1024, parse_human_bytes("5242880").unwrap());
        assert_eq!(5 * 1024 * 1024 * 1024, parse_human_bytes("5GiB").unwrap());
    }

    #[test]
    fn parse_invalid_value() {
        init_dummy_tracing_subscriber();

        assert!(parse_human_bytes("524287a").is_err());
        assert_eq!(parse_human_bytes("5242879").unwrap_err(), UNDER_MIN_VALUE);
    }

    fn init_dummy_tracing_subscriber() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("dummy=trace")
            .try_init();
    }
}

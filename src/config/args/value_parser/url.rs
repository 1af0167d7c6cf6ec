use url::Url;

const INVALID_SCHEME: &str = "scheme must be https:// or http:// .";
const NO_HOST_SPECIFIED: &str = "host must be specified.";

pub fn check_scheme(url: &str) -> Result<String, String> {
    let parsed = Url::parse(url).map_err(|e| e.to_string())?;

    if parsed.scheme() != "https" && parsed.scheme() != "http" {
        return Err(INVALID_SCHEME.to_string());
    }
    if parsed.host_str().is_none() {
        return Err(NO_HOST_SPECIFIED.to_string());
    }

    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_url() {
        init_dummy_tracing_subscriber();

        check_scheme("https://0123456789abcdef.r2.cloudflarestorage.com").unwrap();
        check_scheme("https://endpoint_url.local/").unwrap();
        check_scheme("http://localhost:9000").unwrap();
        check_scheme("http://127.0.0.1:9000/").unwrap();
    }

    #[test]
    fn invalid_url() {
        init_dummy_tracing_subscriber();

        assert_eq!(
            check_scheme("r2://my-bucket").unwrap_err(),
            INVALID_SCHEME.to_string()
        );
        assert_eq!(
            check_scheme("ftp://endpoint_url.local").unwrap_err(),
            INVALID_SCHEME.to_string()
        );
        assert!(check_scheme("endpoint_url.local").is_err());
    }

    fn init_dummy_tracing_subscriber() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("dummy=trace")
            .try_init();
    }
}

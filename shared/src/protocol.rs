/// Service type browsed when no configuration overrides it
pub const DEFAULT_SERVICE_TYPE: &str = "_test._tcp";

/// Discovery domain used by multicast DNS
pub const DEFAULT_DOMAIN: &str = "local";

/// Environment variable selecting the browse descriptor
pub const BROWSER_TYPE_ENV: &str = "BROWSER_TYPE";

/// `BROWSER_TYPE` values understood by the browser
pub const BROWSER_TYPE_BONJOUR: &str = "bonjour";
pub const BROWSER_TYPE_BONJOUR_WITH_TXT: &str = "bonjourWithTXTRecord";

/// File name of the diagnostic log
pub const LOG_FILE_NAME: &str = "bonjour_service_browser.log";

/// API path prefix
pub const API_PREFIX: &str = "/v1";

/// Builds the mDNS "type + domain" string, e.g. "_test._tcp.local."
pub fn ty_domain(service_type: &str, domain: &str) -> String {
    format!(
        "{}.{}.",
        service_type.trim_end_matches('.'),
        domain.trim_matches('.')
    )
}

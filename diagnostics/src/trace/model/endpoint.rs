use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use typed_builder::TypedBuilder;

const HOSTNAME_ENV: &str = "HOSTNAME";
const HOSTNAME_FILE: &str = "/etc/hostname";
const FALLBACK_HOST: &str = "127.0.0.1";

/// The service and host an annotation was recorded on.
#[derive(TypedBuilder, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    #[builder(setter(into))]
    service_name: String,
    #[builder(setter(into))]
    ipv4: String,
}

impl Endpoint {
    /// Endpoint for `service_name` running on this host.
    ///
    /// The host is read from the `HOSTNAME` environment variable, then
    /// `/etc/hostname`, and falls back to the loopback address.
    pub fn local(service_name: impl Into<String>) -> Self {
        Endpoint::builder()
            .service_name(service_name)
            .ipv4(resolve_host_address())
            .build()
    }

    /// The service name.
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// The host address.
    pub fn ipv4(&self) -> &str {
        &self.ipv4
    }
}

fn resolve_host_address() -> String {
    if let Some(host) = env::var(HOSTNAME_ENV).ok().filter(|h| !h.trim().is_empty()) {
        return host.trim().to_owned();
    }

    match fs::read_to_string(HOSTNAME_FILE) {
        Ok(contents) if !contents.trim().is_empty() => contents.trim().to_owned(),
        _ => FALLBACK_HOST.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::Endpoint;

    #[test]
    fn test_endpoint() {
        test_json_serialization(
            Endpoint::builder()
                .service_name("checkout")
                .ipv4("10.0.0.7")
                .build(),
            "{\"serviceName\":\"checkout\",\"ipv4\":\"10.0.0.7\"}",
        );
    }

    #[test]
    fn local_endpoint_prefers_hostname_variable() {
        temp_env::with_var("HOSTNAME", Some("web-1"), || {
            let endpoint = Endpoint::local("checkout");
            assert_eq!(endpoint.service_name(), "checkout");
            assert_eq!(endpoint.ipv4(), "web-1");
        });
    }

    #[test]
    fn local_endpoint_never_empty() {
        temp_env::with_var_unset("HOSTNAME", || {
            assert!(!Endpoint::local("checkout").ipv4().is_empty());
        });
    }

    fn test_json_serialization(endpoint: Endpoint, desired: &str) {
        let result = serde_json::to_string(&endpoint).unwrap();
        assert_eq!(result, desired.to_owned());
    }
}

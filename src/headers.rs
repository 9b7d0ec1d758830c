use crate::TrinoError;

/// Protocol name used when none is configured.
pub const DEFAULT_PROTOCOL_NAME: &str = "Trino";

/// Header names of the statement protocol, all prefixed with `X-<name>-`.
///
/// The prefix is configurable so the same client speaks to servers that still
/// use an older protocol name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProtocolHeaders {
    name: String,
    prefix: String,
}

macro_rules! protocol_headers {
    ($($(#[$meta:meta])* $method:ident => $suffix:literal,)+) => {
        impl ProtocolHeaders {
            $(
                $(#[$meta])*
                pub fn $method(&self) -> String {
                    format!("{}{}", self.prefix, $suffix)
                }
            )+
        }
    };
}

impl ProtocolHeaders {
    pub fn new(name: impl Into<String>) -> Result<Self, TrinoError> {
        let name = name.into();
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(TrinoError::Config(
                "protocol name must not be empty".to_owned(),
            ));
        }
        if !trimmed
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            return Err(TrinoError::Config(format!(
                "protocol name '{trimmed}' is not a valid header token"
            )));
        }
        Ok(Self {
            prefix: format!("X-{trimmed}-"),
            name: trimmed.to_owned(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl Default for ProtocolHeaders {
    fn default() -> Self {
        Self {
            name: DEFAULT_PROTOCOL_NAME.to_owned(),
            prefix: format!("X-{DEFAULT_PROTOCOL_NAME}-"),
        }
    }
}

protocol_headers! {
    user => "User",
    source => "Source",
    catalog => "Catalog",
    schema => "Schema",
    path => "Path",
    time_zone => "Time-Zone",
    language => "Language",
    trace_token => "Trace-Token",
    session => "Session",
    role => "Role",
    prepared_statement => "Prepared-Statement",
    transaction_id => "Transaction-Id",
    client_info => "Client-Info",
    client_tags => "Client-Tags",
    client_capabilities => "Client-Capabilities",
    resource_estimate => "Resource-Estimate",
    extra_credential => "Extra-Credential",
    set_catalog => "Set-Catalog",
    set_schema => "Set-Schema",
    set_path => "Set-Path",
    set_session => "Set-Session",
    clear_session => "Clear-Session",
    set_role => "Set-Role",
    added_prepare => "Added-Prepare",
    deallocated_prepare => "Deallocated-Prepare",
    set_authorization_user => "Set-Authorization-User",
    reset_authorization_user => "Reset-Authorization-User",
}

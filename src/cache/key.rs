/// Request parameters that identify a cached response.
///
/// The password is not part of the key: a username is assumed
/// to imply a stable password. After a password rotation the old entry keeps
/// being served until it expires or the cache is cleared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyParams<'a> {
    pub image: Option<&'a str>,
    pub username: Option<&'a str>,
    pub proxy: Option<&'a str>,
}

impl KeyParams<'_> {
    /// `image:<v>|username:<v>|proxy:<v>`, absent fields as empty strings.
    pub fn derive(&self) -> String {
        format!(
            "image:{}|username:{}|proxy:{}",
            self.image.unwrap_or_default(),
            self.username.unwrap_or_default(),
            self.proxy.unwrap_or_default()
        )
    }
}

/// Cache slot for `endpoint`, so equal parameters on different endpoints
/// never share an entry.
pub fn scoped(endpoint: &str, params: &KeyParams<'_>) -> String {
    format!("{endpoint}::{}", params.derive())
}

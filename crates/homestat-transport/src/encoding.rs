//! Header and body encodings used by device APIs.
//!
//! - HTTP Basic authorization from decoded URL credentials
//! - `application/x-www-form-urlencoded` bodies (BBox login)
//! - Session cookie extraction from `Set-Cookie` values

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use homestat_core::Credentials;
use url::form_urlencoded;

/// Build an HTTP Basic `Authorization` header value.
///
/// # Examples
///
/// ```
/// use homestat_core::Credentials;
/// use homestat_transport::basic_authorization;
///
/// let header = basic_authorization(&Credentials::new("admin", "admin"));
/// assert_eq!(header, "Basic YWRtaW46YWRtaW4=");
/// ```
#[must_use]
pub fn basic_authorization(credentials: &Credentials) -> String {
    let raw = format!("{}:{}", credentials.username(), credentials.password());
    format!("Basic {}", STANDARD.encode(raw.as_bytes()))
}

/// Encode key/value pairs as a form body, spaces as `+`.
///
/// # Examples
///
/// ```
/// use homestat_transport::form_urlencode;
///
/// assert_eq!(form_urlencode(&[("password", "p@ss word&")]), "password=p%40ss+word%26");
/// ```
#[must_use]
pub fn form_urlencode(pairs: &[(&str, &str)]) -> String {
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}

/// Find a cookie value among `Set-Cookie` header values.
///
/// Attributes after the first `;` are ignored. Empty values are treated as
/// absent, since devices clear a session by setting the cookie to nothing.
#[must_use]
pub fn cookie_value<'a>(
    set_cookies: impl IntoIterator<Item = &'a str>,
    name: &str,
) -> Option<String> {
    set_cookies.into_iter().find_map(|header| {
        let pair = header.split(';').next()?.trim();
        let (key, value) = pair.split_once('=')?;
        (key.trim() == name && !value.is_empty()).then(|| value.trim().to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_authorization_with_special_chars() {
        let header = basic_authorization(&Credentials::new("admin", "p:ss"));
        assert_eq!(header, "Basic YWRtaW46cDpzcw==");
    }

    #[test]
    fn form_keeps_unreserved() {
        assert_eq!(form_urlencode(&[("a", "x-y.z_*")]), "a=x-y.z_*");
        assert_eq!(
            form_urlencode(&[("a", "1"), ("b", "é")]),
            "a=1&b=%C3%A9"
        );
    }

    #[test]
    fn form_password_round_trips_through_parser() {
        let password = "p@ss word+&=%";
        let body = form_urlencode(&[("password", password)]);
        assert_eq!(body, "password=p%40ss+word%2B%26%3D%25");

        let parsed: Vec<(String, String)> = form_urlencoded::parse(body.as_bytes())
            .into_owned()
            .collect();
        assert_eq!(parsed, [("password".to_string(), password.to_string())]);
    }

    #[test]
    fn cookie_lookup() {
        let headers = [
            "lang=fr; Path=/",
            "BBOX_ID=c0ffee42; Path=/; HttpOnly; Secure",
        ];
        assert_eq!(
            cookie_value(headers, "BBOX_ID"),
            Some("c0ffee42".to_string())
        );
        assert_eq!(cookie_value(headers, "SESSION"), None);
        assert_eq!(cookie_value(["BBOX_ID=; Max-Age=0"], "BBOX_ID"), None);
    }
}

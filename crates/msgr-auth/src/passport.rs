//! Passport (Live SSO) token exchange.
//!
//! The notification server's `USR … TWN S <policy>` reply hands the client a
//! policy string; the client POSTs an RST (RequestSecurityToken) SOAP
//! envelope carrying the credentials and that policy to the Live login
//! endpoint, and gets back the ticket wrapped in XML. The
//! `BinarySecurityToken` text (`t=…&p=…`) is extracted verbatim and becomes
//! the argument of the second `USR`.

use std::io::Cursor;
use std::time::Duration;

use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use tracing::{debug, warn};

use crate::authenticator::{Authenticator, BoxFuture, SsoTicket};
use crate::error::{AuthError, AuthResult};

/// Default RST endpoint. The historical Passport servers are gone; anyone
/// pointing this library at a revived deployment overrides the URL.
pub const DEFAULT_RST_ENDPOINT: &str = "https://login.live.com/RST.srv";

/// The service address tokens are requested for.
const MESSENGER_ADDRESS: &str = "messenger.msn.com";

/// SSO client for the Passport RST exchange.
#[derive(Debug)]
pub struct PassportAuthenticator {
    endpoint: String,
    http_client: reqwest::Client,
}

impl PassportAuthenticator {
    /// Creates an authenticator against the default endpoint.
    pub fn new(timeout: Duration) -> Self {
        Self::with_endpoint(DEFAULT_RST_ENDPOINT, timeout)
    }

    /// Creates an authenticator against a custom RST endpoint.
    pub fn with_endpoint(endpoint: impl Into<String>, timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("failed to create HTTP client");

        Self {
            endpoint: endpoint.into(),
            http_client,
        }
    }

    /// Returns the endpoint URL in use.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn request_ticket(
        &self,
        login: &str,
        password: &str,
        policy: &str,
    ) -> AuthResult<SsoTicket> {
        let body = rst_request_body(login, password, policy);

        debug!(endpoint = %self.endpoint, login = %login, "requesting SSO ticket");

        let response = self
            .http_client
            .post(&self.endpoint)
            .header("Content-Type", "text/xml; charset=utf-8")
            .header("SOAPAction", "http://schemas.xmlsoap.org/ws/2004/04/security/trust/RST/Issue")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(AuthError::BadCredentials(format!(
                "authentication service returned {status}"
            )));
        }

        let text = response.text().await?;
        if !status.is_success() {
            // Auth faults come back as SOAP faults on a 500.
            if text.contains("FailedAuthentication") {
                return Err(AuthError::BadCredentials(
                    "authentication service reported failed authentication".into(),
                ));
            }
            warn!(status = %status, "unexpected SSO response status");
            return Err(AuthError::InvalidResponse(format!(
                "status {status} from authentication service"
            )));
        }

        extract_ticket(&text)
    }
}

impl Authenticator for PassportAuthenticator {
    fn authenticate<'a>(
        &'a self,
        login: &'a str,
        password: &'a str,
        policy: &'a str,
    ) -> BoxFuture<'a, AuthResult<SsoTicket>> {
        Box::pin(self.request_ticket(login, password, policy))
    }
}

/// Builds the RST SOAP envelope.
fn rst_request_body(login: &str, password: &str, policy: &str) -> String {
    let mut writer = Writer::new(Cursor::new(Vec::new()));

    let mut envelope = BytesStart::new("s:Envelope");
    envelope.push_attribute(("xmlns:s", "http://schemas.xmlsoap.org/soap/envelope/"));
    envelope.push_attribute(("xmlns:wsse", "http://schemas.xmlsoap.org/ws/2003/06/secext"));
    envelope.push_attribute(("xmlns:wst", "http://schemas.xmlsoap.org/ws/2004/04/trust"));
    envelope.push_attribute(("xmlns:wsp", "http://schemas.xmlsoap.org/ws/2002/12/policy"));
    envelope.push_attribute(("xmlns:wsa", "http://schemas.xmlsoap.org/ws/2004/03/addressing"));
    envelope.push_attribute(("xmlns:ps", "http://schemas.microsoft.com/Passport/SoapServices/PPCRL"));
    writer.write_event(Event::Start(envelope)).unwrap();

    // Header: the credentials.
    writer
        .write_event(Event::Start(BytesStart::new("s:Header")))
        .unwrap();
    writer
        .write_event(Event::Start(BytesStart::new("wsse:Security")))
        .unwrap();
    writer
        .write_event(Event::Start(BytesStart::new("wsse:UsernameToken")))
        .unwrap();
    write_text_element(&mut writer, "wsse:Username", login);
    write_text_element(&mut writer, "wsse:Password", password);
    writer
        .write_event(Event::End(BytesEnd::new("wsse:UsernameToken")))
        .unwrap();
    writer
        .write_event(Event::End(BytesEnd::new("wsse:Security")))
        .unwrap();
    writer
        .write_event(Event::End(BytesEnd::new("s:Header")))
        .unwrap();

    // Body: one token request carrying the server's policy string.
    writer
        .write_event(Event::Start(BytesStart::new("s:Body")))
        .unwrap();
    writer
        .write_event(Event::Start(BytesStart::new(
            "ps:RequestMultipleSecurityTokens",
        )))
        .unwrap();

    let mut rst = BytesStart::new("wst:RequestSecurityToken");
    rst.push_attribute(("Id", "RST0"));
    writer.write_event(Event::Start(rst)).unwrap();
    write_text_element(
        &mut writer,
        "wst:RequestType",
        "http://schemas.xmlsoap.org/ws/2004/04/security/trust/Issue",
    );
    writer
        .write_event(Event::Start(BytesStart::new("wsp:AppliesTo")))
        .unwrap();
    writer
        .write_event(Event::Start(BytesStart::new("wsa:EndpointReference")))
        .unwrap();
    write_text_element(&mut writer, "wsa:Address", MESSENGER_ADDRESS);
    writer
        .write_event(Event::End(BytesEnd::new("wsa:EndpointReference")))
        .unwrap();
    writer
        .write_event(Event::End(BytesEnd::new("wsp:AppliesTo")))
        .unwrap();

    let mut policy_ref = BytesStart::new("wsse:PolicyReference");
    policy_ref.push_attribute(("URI", policy));
    writer.write_event(Event::Empty(policy_ref)).unwrap();

    writer
        .write_event(Event::End(BytesEnd::new("wst:RequestSecurityToken")))
        .unwrap();
    writer
        .write_event(Event::End(BytesEnd::new(
            "ps:RequestMultipleSecurityTokens",
        )))
        .unwrap();
    writer
        .write_event(Event::End(BytesEnd::new("s:Body")))
        .unwrap();
    writer
        .write_event(Event::End(BytesEnd::new("s:Envelope")))
        .unwrap();

    let result = writer.into_inner().into_inner();
    String::from_utf8(result).unwrap()
}

fn write_text_element(writer: &mut Writer<Cursor<Vec<u8>>>, name: &str, text: &str) {
    writer
        .write_event(Event::Start(BytesStart::new(name)))
        .unwrap();
    writer.write_event(Event::Text(BytesText::new(text))).unwrap();
    writer
        .write_event(Event::End(BytesEnd::new(name)))
        .unwrap();
}

/// Pulls the `BinarySecurityToken` text out of an RST response.
fn extract_ticket(xml: &str) -> AuthResult<SsoTicket> {
    let mut reader = quick_xml::Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut in_token = false;
    let mut in_fault = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                match local_name(&name) {
                    "BinarySecurityToken" => in_token = true,
                    "Fault" => in_fault = true,
                    _ => {}
                }
            }
            Ok(Event::End(_)) => {
                in_token = false;
            }
            Ok(Event::Text(e)) => {
                let text = e.unescape().unwrap_or_default().to_string();
                if in_token && !text.is_empty() {
                    return Ok(SsoTicket::new(text));
                }
                if in_fault && text.contains("FailedAuthentication") {
                    return Err(AuthError::BadCredentials(
                        "authentication service reported failed authentication".into(),
                    ));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(AuthError::InvalidResponse(format!(
                    "unparseable RST response: {e}"
                )));
            }
            _ => {}
        }
        buf.clear();
    }

    if in_fault {
        return Err(AuthError::BadCredentials(
            "authentication service returned a fault".into(),
        ));
    }
    Err(AuthError::InvalidResponse(
        "no BinarySecurityToken in RST response".into(),
    ))
}

/// Strips a namespace prefix from an element name.
fn local_name(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_carries_credentials_and_policy() {
        let body = rst_request_body("a@b.c", "hunter2", "ct=1,rver=1,id=507");
        assert!(body.contains("<wsse:Username>a@b.c</wsse:Username>"));
        assert!(body.contains("<wsse:Password>hunter2</wsse:Password>"));
        assert!(body.contains("URI=\"ct=1,rver=1,id=507\""));
        assert!(body.contains(MESSENGER_ADDRESS));
    }

    #[test]
    fn request_body_escapes_xml_metacharacters() {
        let body = rst_request_body("a@b.c", "p<w&d", "policy");
        assert!(body.contains("p&lt;w&amp;d"));
        assert!(!body.contains("p<w&d"));
    }

    #[test]
    fn extract_ticket_from_response() {
        let xml = r#"<S:Envelope xmlns:S="http://schemas.xmlsoap.org/soap/envelope/">
            <S:Body>
              <wst:RequestSecurityTokenResponse>
                <wst:RequestedSecurityToken>
                  <wsse:BinarySecurityToken Id="PPToken1">t=ticket&amp;p=proof</wsse:BinarySecurityToken>
                </wst:RequestedSecurityToken>
              </wst:RequestSecurityTokenResponse>
            </S:Body>
          </S:Envelope>"#;
        let ticket = extract_ticket(xml).unwrap();
        assert_eq!(ticket.as_str(), "t=ticket&p=proof");
    }

    #[test]
    fn extract_ticket_detects_auth_fault() {
        let xml = r#"<S:Envelope xmlns:S="http://schemas.xmlsoap.org/soap/envelope/">
            <S:Body>
              <S:Fault>
                <faultcode>wsse:FailedAuthentication</faultcode>
                <faultstring>Authentication Failure</faultstring>
              </S:Fault>
            </S:Body>
          </S:Envelope>"#;
        assert!(matches!(
            extract_ticket(xml),
            Err(AuthError::BadCredentials(_))
        ));
    }

    #[test]
    fn extract_ticket_rejects_tokenless_response() {
        let xml = "<S:Envelope><S:Body/></S:Envelope>";
        assert!(matches!(
            extract_ticket(xml),
            Err(AuthError::InvalidResponse(_))
        ));
    }
}

use std::net::TcpStream;

use base64::{Engine as _, engine::general_purpose};
use native_tls::{TlsConnector, TlsStream};

use crate::auth::TokenManager;
use crate::config::LabelMode;
use crate::domain::{EmailId, EmailRecord};
use crate::error::CollaboratorError;
use crate::mail::Mailbox;
use crate::mail::decoders::parse_message;

type Session = imap::Session<TlsStream<TcpStream>>;

const INBOX: &str = "INBOX";

/// Build canonical auth string as bytes.
fn build_xoauth2_bytes(user: &str, access_token: &str) -> Vec<u8> {
    format!("user={user}\x01auth=Bearer {access_token}\x01\x01").into_bytes()
}

struct OAuth2Authenticator {
    response: Vec<u8>,
}

impl imap::Authenticator for OAuth2Authenticator {
    type Response = Vec<u8>;
    fn process(&self, _challenge: &[u8]) -> Self::Response {
        self.response.clone()
    }
}

/// How the client proves who it is.
#[derive(Clone)]
pub enum ImapLogin {
    XOAuth2(TokenManager),
    Password(String),
}

/// Gmail/IMAP mailbox. Each call opens its own short session.
pub struct ImapClient {
    pub server: String,
    pub port: u16,
    pub user: String,
    pub label_mode: LabelMode,
    login: ImapLogin,
}

impl ImapClient {
    pub fn new(
        server: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        login: ImapLogin,
        label_mode: LabelMode,
    ) -> Self {
        Self {
            server: server.into(),
            port,
            user: user.into(),
            label_mode,
            login,
        }
    }

    fn connect_and_auth(&self) -> Result<Session, CollaboratorError> {
        let tls = TlsConnector::builder().build().map_err(CollaboratorError::mailbox)?;
        let client = imap::connect((self.server.as_str(), self.port), self.server.as_str(), &tls)
            .map_err(CollaboratorError::mailbox)?;

        match &self.login {
            ImapLogin::Password(password) => client
                .login(&self.user, password)
                .map_err(|(e, _)| CollaboratorError::Auth(e.to_string())),
            ImapLogin::XOAuth2(tokens) => {
                let access_token = tokens
                    .get_access_token()
                    .map_err(|e| CollaboratorError::Auth(e.to_string()))?;
                xoauth2(client, &self.user, &access_token)
            }
        }
    }

    /// Open a session with INBOX selected, run `f`, then log out.
    fn with_inbox<T>(
        &self,
        f: impl FnOnce(&mut Session) -> Result<T, CollaboratorError>,
    ) -> Result<T, CollaboratorError> {
        let mut session = self.connect_and_auth()?;
        session.select(INBOX).map_err(CollaboratorError::mailbox)?;
        let out = f(&mut session);
        if let Err(e) = session.logout() {
            log::debug!("IMAP logout failed: {e}");
        }
        out
    }

    fn fetch_one(session: &mut Session, uid: EmailId) -> Result<Option<EmailRecord>, CollaboratorError> {
        let fetches = session
            .uid_fetch(uid.to_string(), "(UID BODY.PEEK[])")
            .map_err(CollaboratorError::mailbox)?;
        let Some(raw) = fetches.iter().next().and_then(|f| f.body()) else {
            log::warn!("UID {uid} came back without a body; skipping");
            return Ok(None);
        };

        let msg = parse_message(raw);
        Ok(Some(EmailRecord {
            id: uid,
            message_id: msg.message_id,
            sender: msg.sender,
            subject: msg.subject,
            body: msg.body,
            date_epoch: msg.date_epoch,
        }))
    }

    fn copy_to_folder(session: &mut Session, uid: EmailId, folder: &str) -> Result<(), CollaboratorError> {
        let uid = uid.to_string();
        if session.uid_copy(&uid, folder).is_ok() {
            return Ok(());
        }
        // Most servers refuse COPY into a missing mailbox; create it once.
        if let Err(e) = session.create(folder) {
            log::debug!("CREATE {folder} failed: {e}");
        }
        session.uid_copy(&uid, folder).map_err(CollaboratorError::mailbox)
    }
}

fn xoauth2(
    mut client: imap::Client<TlsStream<TcpStream>>,
    user: &str,
    access_token: &str,
) -> Result<Session, CollaboratorError> {
    let raw_payload = build_xoauth2_bytes(user, access_token);

    // Some servers want the raw string, others base64.
    let auth_raw = OAuth2Authenticator {
        response: raw_payload.clone(),
    };
    match client.authenticate("XOAUTH2", &auth_raw) {
        Ok(session) => return Ok(session),
        Err((_e, returned_client)) => {
            client = returned_client;
        }
    }

    let auth_b64 = OAuth2Authenticator {
        response: general_purpose::STANDARD.encode(&raw_payload).into_bytes(),
    };
    client
        .authenticate("XOAUTH2", &auth_b64)
        .map_err(|(e, _)| CollaboratorError::Auth(format!("XOAUTH2 failed (raw+base64): {e}")))
}

/// Quote a label for an IMAP `X-GM-LABELS` list.
fn quote_label(name: &str) -> String {
    let escaped = name.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// Newest `n` of `uids`, newest first.
fn newest_uids(uids: impl IntoIterator<Item = u32>, n: usize) -> Vec<u32> {
    let mut uids: Vec<u32> = uids.into_iter().collect();
    uids.sort_unstable_by(|a, b| b.cmp(a));
    uids.dedup();
    uids.truncate(n);
    uids
}

impl Mailbox for ImapClient {
    fn fetch_recent(&self, n: usize) -> Result<Vec<EmailRecord>, CollaboratorError> {
        if n == 0 {
            return Ok(Vec::new());
        }
        self.with_inbox(|session| {
            let uids = session.uid_search("ALL").map_err(CollaboratorError::mailbox)?;
            let mut out = Vec::with_capacity(n.min(uids.len()));
            for uid in newest_uids(uids, n) {
                if let Some(record) = Self::fetch_one(session, uid)? {
                    out.push(record);
                }
            }
            log::debug!("fetched {} messages from {INBOX}", out.len());
            Ok(out)
        })
    }

    fn apply_label(&self, id: EmailId, name: &str) -> Result<(), CollaboratorError> {
        self.with_inbox(|session| match self.label_mode {
            LabelMode::Gmail => session
                .uid_store(id.to_string(), format!("+X-GM-LABELS ({})", quote_label(name)))
                .map(|_| ())
                .map_err(CollaboratorError::mailbox),
            LabelMode::Folder => Self::copy_to_folder(session, id, name),
        })
    }

    fn mark_read(&self, id: EmailId) -> Result<(), CollaboratorError> {
        self.with_inbox(|session| {
            session
                .uid_store(id.to_string(), "+FLAGS (\\Seen)")
                .map(|_| ())
                .map_err(CollaboratorError::mailbox)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xoauth2_payload_layout() {
        assert_eq!(
            build_xoauth2_bytes("me@gmail.com", "tok"),
            b"user=me@gmail.com\x01auth=Bearer tok\x01\x01".to_vec()
        );
    }

    #[test]
    fn labels_are_quoted() {
        assert_eq!(quote_label("Junk"), "\"Junk\"");
        assert_eq!(quote_label("a \"b\""), "\"a \\\"b\\\"\"");
    }

    #[test]
    fn newest_uids_are_descending_and_bounded() {
        assert_eq!(newest_uids([3, 9, 1, 7, 9], 3), vec![9, 7, 3]);
        assert_eq!(newest_uids([], 5), Vec::<u32>::new());
    }
}

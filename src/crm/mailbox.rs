use std::sync::LazyLock;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailparse::{DispositionType, MailHeaderMap, ParsedMail};
use regex::Regex;

use crate::cli::MailboxArgs;
use crate::error::{PipelineError, Result};

static OTP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{6}\b").expect("valid OTP regex"));

/// Allowance for clock drift between this host and the mail server.
const DATE_SKEW_SECS: i64 = 120;

/// A mailbox that may hold the CRM's verification email.
#[async_trait]
pub trait OtpMailbox: Send + Sync {
    /// One pass over unread mail; `None` when no matching message has arrived yet.
    async fn fetch_code(&self, requested_at: DateTime<Utc>) -> Result<Option<String>>;
}

/// Which verification emails count.
#[derive(Debug, Clone)]
pub struct OtpFilter {
    pub subject: String,
    pub sender: String,
}

#[derive(Debug, Clone)]
pub struct PollPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub timeout: Duration,
}

impl PollPolicy {
    pub fn from_args(args: &MailboxArgs) -> Self {
        Self {
            initial: Duration::from_secs(args.poll_secs.max(1)),
            max: Duration::from_secs(args.poll_max_secs.max(args.poll_secs).max(1)),
            timeout: Duration::from_secs(args.timeout_secs),
        }
    }
}

/// Waits for a verification code with exponential backoff, bounded by `policy.timeout`.
///
/// Dropping the returned future cancels the wait.
pub async fn poll_for_code(
    mailbox: &dyn OtpMailbox,
    requested_at: DateTime<Utc>,
    policy: &PollPolicy,
) -> Result<String> {
    let wait = async {
        let mut delay = policy.initial;
        loop {
            tracing::info!("Waiting {:?} for the CRM verification email", delay);
            tokio::time::sleep(delay).await;
            if let Some(code) = mailbox.fetch_code(requested_at).await? {
                tracing::info!("Verification code received");
                return Ok(code);
            }
            delay = (delay * 2).min(policy.max);
        }
    };

    tokio::time::timeout(policy.timeout, wait)
        .await
        .map_err(|_| PipelineError::OtpTimeout {
            waited_secs: policy.timeout.as_secs(),
        })?
}

/// IMAP over TLS, read-only: the inbox is opened with EXAMINE and bodies are
/// fetched with `BODY.PEEK[]`, so nothing is marked seen.
#[derive(Clone)]
pub struct ImapMailbox {
    host: String,
    port: u16,
    user: String,
    password: String,
    filter: OtpFilter,
}

impl ImapMailbox {
    pub fn new(args: &MailboxArgs, fallback_user: &str) -> Self {
        Self {
            host: args.host.clone(),
            port: args.port,
            user: args
                .user
                .clone()
                .unwrap_or_else(|| fallback_user.to_string()),
            password: args.password.clone(),
            filter: OtpFilter {
                subject: args.otp_subject.clone(),
                sender: args.otp_sender.clone(),
            },
        }
    }

    fn fetch_blocking(&self, requested_at: DateTime<Utc>) -> anyhow::Result<Option<String>> {
        let tls = native_tls::TlsConnector::builder()
            .build()
            .context("build TLS connector")?;
        let client = imap::connect((self.host.as_str(), self.port), &self.host, &tls)
            .with_context(|| format!("connect to {}:{}", self.host, self.port))?;
        let mut session = client
            .login(&self.user, &self.password)
            .map_err(|(e, _)| e)
            .context("mailbox login")?;

        session.examine("INBOX").context("open INBOX")?;
        let query = search_query(requested_at);
        let mut ids: Vec<u32> = session
            .search(&query)
            .context("search unseen mail")?
            .into_iter()
            .collect();
        ids.sort_unstable();

        let not_before = requested_at.timestamp() - DATE_SKEW_SECS;
        let mut code = None;
        'messages: for id in ids {
            let fetched = session
                .fetch(id.to_string(), "BODY.PEEK[]")
                .with_context(|| format!("fetch message {id}"))?;
            for msg in fetched.iter() {
                let Some(raw) = msg.body() else {
                    continue;
                };
                match code_from_message(raw, &self.filter, Some(not_before)) {
                    Ok(Some(found)) => {
                        code = Some(found);
                        break 'messages;
                    }
                    Ok(None) => {}
                    Err(err) => tracing::warn!("Skipping unparsable message {id}: {err}"),
                }
            }
        }

        session.logout().ok();
        Ok(code)
    }
}

#[async_trait]
impl OtpMailbox for ImapMailbox {
    async fn fetch_code(&self, requested_at: DateTime<Utc>) -> Result<Option<String>> {
        let mailbox = self.clone();
        tokio::task::spawn_blocking(move || mailbox.fetch_blocking(requested_at))
            .await
            .map_err(|e| PipelineError::Authentication(format!("mailbox task failed: {e}")))?
            .map_err(|e| PipelineError::Authentication(format!("mailbox check failed: {e:#}")))
    }
}

/// IMAP `SINCE` compares calendar days on the server's clock, so search from
/// the day before and let the `Date` cutoff in [`code_from_message`] drop stale mail.
fn search_query(requested_at: DateTime<Utc>) -> String {
    let since = requested_at - chrono::Duration::days(1);
    format!("UNSEEN SINCE {}", since.format("%d-%b-%Y"))
}

/// The 6-digit code of a verification email, or `None` for any other message.
///
/// `not_before` (unix seconds) drops verification emails left over from earlier logins.
pub fn code_from_message(
    raw: &[u8],
    filter: &OtpFilter,
    not_before: Option<i64>,
) -> std::result::Result<Option<String>, mailparse::MailParseError> {
    let mail = mailparse::parse_mail(raw)?;
    let subject = mail.headers.get_first_value("Subject").unwrap_or_default();
    let from = mail.headers.get_first_value("From").unwrap_or_default();
    if subject.trim() != filter.subject || from.trim() != filter.sender {
        tracing::debug!("Ignoring mail {subject:?} from {from:?}");
        return Ok(None);
    }

    if let (Some(cutoff), Some(date)) = (not_before, mail.headers.get_first_value("Date")) {
        if mailparse::dateparse(&date).is_ok_and(|sent| sent < cutoff) {
            tracing::debug!("Ignoring stale verification email sent {date}");
            return Ok(None);
        }
    }

    let Some(body) = plain_text_body(&mail)? else {
        return Ok(None);
    };
    Ok(OTP_RE.find(&body).map(|m| m.as_str().to_string()))
}

fn plain_text_body(mail: &ParsedMail<'_>) -> std::result::Result<Option<String>, mailparse::MailParseError> {
    if mail.subparts.is_empty() {
        return mail.get_body().map(Some);
    }
    for part in &mail.subparts {
        if part.get_content_disposition().disposition == DispositionType::Attachment {
            continue;
        }
        if part.ctype.mimetype == "text/plain" {
            return part.get_body().map(Some);
        }
        if !part.subparts.is_empty() {
            if let Some(body) = plain_text_body(part)? {
                return Ok(Some(body));
            }
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn filter() -> OtpFilter {
        OtpFilter {
            subject: "Your Licentiam verification code.".into(),
            sender: "Licentiam <contact@licentiam.com>".into(),
        }
    }

    const PLAIN: &str = "From: Licentiam <contact@licentiam.com>\r\n\
Subject: Your Licentiam verification code.\r\n\
Date: Tue, 1 Oct 2024 12:00:00 +0000\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
Your verification code is 482913. It expires in 10 minutes.\r\n";

    const MULTIPART: &str = "From: Licentiam <contact@licentiam.com>\r\n\
Subject: Your Licentiam verification code.\r\n\
Content-Type: multipart/alternative; boundary=\"XX\"\r\n\
\r\n\
--XX\r\n\
Content-Type: text/html; charset=utf-8\r\n\
\r\n\
<p>Code <b>111111</b></p>\r\n\
--XX\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
Code: 205577\r\n\
--XX--\r\n";

    #[test]
    fn code_is_read_from_plain_body() {
        let code = code_from_message(PLAIN.as_bytes(), &filter(), None).unwrap();
        assert_eq!(code.as_deref(), Some("482913"));
    }

    #[test]
    fn multipart_uses_the_text_plain_part() {
        let code = code_from_message(MULTIPART.as_bytes(), &filter(), None).unwrap();
        assert_eq!(code.as_deref(), Some("205577"));
    }

    #[test]
    fn other_subjects_or_senders_are_ignored() {
        let wrong_subject = PLAIN.replace("verification code.", "newsletter");
        assert_eq!(
            code_from_message(wrong_subject.as_bytes(), &filter(), None).unwrap(),
            None
        );
        let wrong_sender = PLAIN.replace("contact@licentiam.com", "phish@example.com");
        assert_eq!(
            code_from_message(wrong_sender.as_bytes(), &filter(), None).unwrap(),
            None
        );
    }

    #[test]
    fn stale_messages_are_ignored() {
        // Date header is 2024-10-01T12:00:00Z = 1727784000.
        let cutoff_after = Some(1_727_784_000 + 1);
        assert_eq!(
            code_from_message(PLAIN.as_bytes(), &filter(), cutoff_after).unwrap(),
            None
        );
        let cutoff_before = Some(1_727_784_000 - 1);
        assert!(
            code_from_message(PLAIN.as_bytes(), &filter(), cutoff_before)
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn search_reaches_back_a_day_for_servers_behind_utc() {
        let just_after_midnight = "2026-10-20T00:30:00Z".parse::<DateTime<Utc>>().unwrap();
        assert_eq!(search_query(just_after_midnight), "UNSEEN SINCE 19-Oct-2026");

        let new_year = "2027-01-01T12:00:00Z".parse::<DateTime<Utc>>().unwrap();
        assert_eq!(search_query(new_year), "UNSEEN SINCE 31-Dec-2026");
    }

    #[test]
    fn longer_digit_runs_are_not_codes() {
        let msg = PLAIN.replace("482913", "4829130");
        assert_eq!(code_from_message(msg.as_bytes(), &filter(), None).unwrap(), None);
    }

    struct ScriptedMailbox {
        replies: Mutex<Vec<Option<String>>>,
        calls: AtomicUsize,
    }

    impl ScriptedMailbox {
        fn new(replies: Vec<Option<&str>>) -> Self {
            let mut replies: Vec<Option<String>> =
                replies.into_iter().map(|r| r.map(str::to_string)).collect();
            replies.reverse();
            Self {
                replies: Mutex::new(replies),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl OtpMailbox for ScriptedMailbox {
        async fn fetch_code(&self, _requested_at: DateTime<Utc>) -> Result<Option<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.replies.lock().unwrap().pop().flatten())
        }
    }

    fn policy(timeout_secs: u64) -> PollPolicy {
        PollPolicy {
            initial: Duration::from_secs(5),
            max: Duration::from_secs(30),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn poll_returns_first_code() {
        let mailbox = ScriptedMailbox::new(vec![None, None, Some("123456")]);
        let code = poll_for_code(&mailbox, Utc::now(), &policy(300)).await.unwrap();
        assert_eq!(code, "123456");
        assert_eq!(mailbox.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_backs_off_and_times_out() {
        let mailbox = ScriptedMailbox::new(vec![]);
        let err = poll_for_code(&mailbox, Utc::now(), &policy(60))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::OtpTimeout { waited_secs: 60 }));
        // Polls at t=5, 15, 35; the next would be t=65.
        assert_eq!(mailbox.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn mailbox_errors_stop_the_poll() {
        struct Broken;
        #[async_trait]
        impl OtpMailbox for Broken {
            async fn fetch_code(&self, _: DateTime<Utc>) -> Result<Option<String>> {
                Err(PipelineError::Authentication("mailbox login".into()))
            }
        }
        let err = poll_for_code(&Broken, Utc::now(), &policy(300))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Authentication(_)));
    }
}

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

pub const DEFAULT_PORTAL_LOGIN_URL: &str = "https://pdc-reports.fsmb.org/";
pub const DEFAULT_PORTAL_API_BASE: &str = "https://pdc-appapi.fsmb.org";
pub const DEFAULT_CRM_API_BASE: &str = "https://api.licentiam.com/api/admin";
pub const DEFAULT_LLM_API_BASE: &str = "https://api.openai.com/v1";

/// localStorage key the portal's identity provider writes once sign-in completes.
pub const DEFAULT_ID_TOKEN_KEY: &str = "02d544b8-5953-409e-acac-6e9dc1245c51-b2c_1_signin.47d5d385-8b25-48c4-87bc-719b6e01c6c2-pdcreports.b2clogin.com-idtoken-03c06422-233c-4bba-b656-9f61071e6633----";

#[derive(Parser, Debug)]
#[command(name = "provider-intake")]
#[command(about = "Pull licensing-board reports and onboard providers into the credentialing CRM", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the HTTP API.
    Serve(ServeArgs),
    /// Log in to the portal and the CRM once and print both bearer tokens as JSON.
    Login(LoginArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct ServeArgs {
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "PORT", default_value_t = 8000)]
    pub port: u16,

    #[command(flatten)]
    pub services: ServiceArgs,
}

#[derive(clap::Args, Debug, Clone)]
pub struct LoginArgs {
    #[command(flatten)]
    pub services: ServiceArgs,
}

/// Everything needed to talk to the external collaborators.
#[derive(clap::Args, Debug, Clone)]
pub struct ServiceArgs {
    #[command(flatten)]
    pub portal: PortalArgs,

    #[command(flatten)]
    pub crm: CrmArgs,

    #[command(flatten)]
    pub mailbox: MailboxArgs,

    #[command(flatten)]
    pub llm: LlmArgs,

    /// JSON array of {"abbrev", "id"} pairs mapping profession abbreviations to CRM ids.
    #[arg(long, env = "PROFESSIONS_FILE", default_value = "constants/professions.json")]
    pub professions_file: PathBuf,
}

#[derive(clap::Args, Debug, Clone)]
pub struct PortalArgs {
    #[arg(long = "portal-username", env = "FSMB_USERNAME")]
    pub username: String,

    #[arg(long = "portal-password", env = "FSMB_PASSWORD", hide_env_values = true)]
    pub password: String,

    /// Browser sign-in page.
    #[arg(long = "portal-login-url", default_value = DEFAULT_PORTAL_LOGIN_URL)]
    pub login_url: String,

    /// Base URL of the roster/report API.
    #[arg(long = "portal-api-base", default_value = DEFAULT_PORTAL_API_BASE)]
    pub api_base: String,

    /// Customer (fleet) id every roster and report call is scoped to.
    #[arg(long = "portal-customer-id", env = "FSMB_CUSTOMER_ID", default_value_t = 7881)]
    pub customer_id: u64,

    #[arg(long = "portal-id-token-key", default_value = DEFAULT_ID_TOKEN_KEY)]
    pub id_token_key: String,

    /// Seconds to wait for the login form to render.
    #[arg(long = "portal-form-timeout-secs", default_value_t = 10)]
    pub form_timeout_secs: u64,

    /// Seconds to wait for the identity token to land in localStorage after submitting.
    #[arg(long = "portal-login-timeout-secs", default_value_t = 30)]
    pub login_timeout_secs: u64,
}

impl PortalArgs {
    pub fn form_timeout(&self) -> Duration {
        Duration::from_secs(self.form_timeout_secs)
    }

    pub fn login_timeout(&self) -> Duration {
        Duration::from_secs(self.login_timeout_secs)
    }
}

#[derive(clap::Args, Debug, Clone)]
pub struct CrmArgs {
    #[arg(long = "crm-email", env = "CRM_EMAIL")]
    pub email: String,

    #[arg(long = "crm-password", env = "CRM_PASSWORD", hide_env_values = true)]
    pub password: String,

    #[arg(long = "crm-api-base", env = "CRM_API_BASE", default_value = DEFAULT_CRM_API_BASE)]
    pub api_base: String,
}

#[derive(clap::Args, Debug, Clone)]
pub struct MailboxArgs {
    #[arg(long = "imap-host", env = "IMAP_HOST", default_value = "imap.gmail.com")]
    pub host: String,

    #[arg(long = "imap-port", env = "IMAP_PORT", default_value_t = 993)]
    pub port: u16,

    /// Mailbox login. Falls back to the CRM account email.
    #[arg(long = "mailbox-user", env = "MAILBOX_USER")]
    pub user: Option<String>,

    #[arg(long = "mailbox-password", env = "CRM_APP_PASSWORD", hide_env_values = true)]
    pub password: String,

    #[arg(long = "otp-subject", default_value = "Your Licentiam verification code.")]
    pub otp_subject: String,

    #[arg(long = "otp-sender", default_value = "Licentiam <contact@licentiam.com>")]
    pub otp_sender: String,

    /// First delay between inbox polls; doubles after every empty poll.
    #[arg(long = "otp-poll-secs", default_value_t = 5)]
    pub poll_secs: u64,

    /// Upper bound for the delay between inbox polls.
    #[arg(long = "otp-poll-max-secs", default_value_t = 30)]
    pub poll_max_secs: u64,

    /// Give up waiting for the verification email after this many seconds.
    #[arg(long = "otp-timeout-secs", default_value_t = 300)]
    pub timeout_secs: u64,
}

#[derive(clap::Args, Debug, Clone)]
pub struct LlmArgs {
    #[arg(long = "openai-api-key", env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: String,

    #[arg(long = "openai-model", env = "OPENAI_MODEL", default_value = "gpt-4o")]
    pub model: String,

    #[arg(long = "openai-api-base", env = "OPENAI_API_BASE", default_value = DEFAULT_LLM_API_BASE)]
    pub api_base: String,
}

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "talksense", version, about = "Chat with a TalkSense assistant from the terminal")]
pub struct Cli {
    /// Overrides `api.base_url` from talksense.yaml.
    #[arg(long, global = true, value_name = "URL")]
    pub api: Option<String>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Sign in with email and password.
    Login {
        #[arg(long)]
        email: String,
        /// Read from stdin when omitted.
        #[arg(long, env = "TALKSENSE_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Sign in with a Google ID token.
    GoogleLogin {
        #[arg(long)]
        token: String,
    },
    /// Create an account; a one-time code is sent by email.
    Signup(SignupArgs),
    /// Confirm an email address with the one-time code.
    Verify {
        #[arg(long)]
        email: String,
        #[arg(long)]
        otp: String,
    },
    /// Mail a new one-time code for a pending signup.
    ResendOtp {
        #[arg(long)]
        email: String,
    },
    /// Ask for a password reset link.
    ResetPassword {
        #[arg(long)]
        email: String,
    },
    /// Set a new password with the token from the reset link.
    ConfirmReset {
        #[arg(long)]
        token: String,
        #[arg(long, env = "TALKSENSE_NEW_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    Logout,
    /// Show the signed-in user.
    Whoami,
    /// List conversations.
    Sessions {
        #[arg(long)]
        archived: bool,
    },
    /// Send a message, or start an interactive chat when no message is given.
    Chat {
        /// Continue an existing conversation.
        #[arg(long, value_name = "ID")]
        session: Option<String>,
        message: Vec<String>,
    },
    /// Print a conversation.
    Show {
        id: String,
        /// Read the shared view; no sign-in needed.
        #[arg(long)]
        public: bool,
    },
    /// Rate an assistant message from 1 to 5.
    Rate { message: String, score: u8 },
    Rename { id: String, title: Vec<String> },
    Pin { id: String },
    Unpin { id: String },
    Archive { id: String },
    Unarchive { id: String },
    Delete { id: String },
    /// Toggle public sharing.
    Share { id: String },
}

#[derive(Args, Debug)]
pub struct SignupArgs {
    #[arg(long)]
    pub email: String,
    #[arg(long, env = "TALKSENSE_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
    #[arg(long)]
    pub first_name: Option<String>,
    #[arg(long)]
    pub last_name: Option<String>,
}

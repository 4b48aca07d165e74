use crate::cli::{Cli, Command, SignupArgs};
use crate::render::{message_block, record_block, session_line, ReplyEcho};
use crate::AlreadyReported;
use anyhow::{anyhow, bail, Result};
use std::io::Write;
use std::sync::Arc;
use talksense_core::{
    AuthService, ClientSettings, ConversationKey, ConversationStore, DurableId,
    FileCredentialStorage, MessageId, MessagePipeline, SendReport, SignupRequest, Transport,
    UserProfile,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

/// Everything a command needs, wired from resolved settings.
pub struct Client {
    auth: AuthService,
    pipeline: MessagePipeline,
}

impl Client {
    pub fn from_settings(settings: &ClientSettings) -> Result<Self> {
        let storage = Arc::new(FileCredentialStorage::new(&settings.credentials_path));
        let transport = Transport::from_settings(settings, storage)?;
        Ok(Self {
            auth: AuthService::new(transport.clone()),
            pipeline: MessagePipeline::new(ConversationStore::new(), transport, settings.chat),
        })
    }

    async fn require_session(&self) -> Result<UserProfile> {
        match self.auth.restore_session().await? {
            Some(user) => Ok(user),
            None => bail!("Not signed in. Run `talksense login` first."),
        }
    }

    pub async fn execute(&self, command: Command) -> Result<()> {
        match command {
            Command::Login { email, password } => {
                let password = match password {
                    Some(password) => password,
                    None => prompt("Password: ").await?,
                };
                let user = self.auth.login(&email, &password).await?;
                println!("Signed in as {}", user.display_name());
            }
            Command::GoogleLogin { token } => {
                let user = self.auth.google_login(&token).await?;
                println!("Signed in as {}", user.display_name());
            }
            Command::Signup(args) => self.signup(args).await?,
            Command::Verify { email, otp } => {
                println!("{}", self.auth.verify_email(&email, &otp).await?);
            }
            Command::ResendOtp { email } => {
                println!("{}", self.auth.resend_otp(&email).await?);
            }
            Command::ResetPassword { email } => {
                println!("{}", self.auth.request_password_reset(&email).await?);
            }
            Command::ConfirmReset { token, password } => {
                let password = match password {
                    Some(password) => password,
                    None => prompt("New password: ").await?,
                };
                println!("{}", self.auth.confirm_password_reset(&token, &password).await?);
            }
            Command::Logout => {
                self.auth.credentials().load()?;
                self.auth.logout().await?;
                println!("Signed out.");
            }
            Command::Whoami => {
                let user = self.require_session().await?;
                println!("{} <{}>", user.display_name(), user.email);
            }
            Command::Sessions { archived } => {
                self.require_session().await?;
                let conversations = if archived {
                    self.pipeline.refresh_archived().await?
                } else {
                    self.pipeline.refresh_list().await?
                };
                if conversations.is_empty() {
                    println!("No conversations.");
                }
                for conversation in &conversations {
                    println!("{}", session_line(conversation));
                }
            }
            Command::Chat { session, message } => {
                self.require_session().await?;
                let id = session.map(DurableId::new);
                if message.is_empty() {
                    self.interactive(id).await?;
                } else {
                    let report = self.send(id.as_ref(), None, &message.join(" ")).await?;
                    if let Some(id) = &report.conversation_id {
                        println!("conversation {id}");
                    }
                    reply_outcome(report)?;
                }
            }
            Command::Show { id, public } => {
                let id = DurableId::new(id);
                if public {
                    let shared = self.pipeline.public_conversation(&id).await?;
                    println!("# {}\n", shared.title);
                    for record in &shared.messages {
                        println!("{}", record_block(record));
                    }
                } else {
                    self.require_session().await?;
                    let key = self.pipeline.open(&id).await?;
                    let conversation = self
                        .pipeline
                        .store()
                        .get(key)
                        .ok_or_else(|| anyhow!("conversation {id} disappeared"))?;
                    println!("# {}\n", conversation.title);
                    for message in &conversation.messages {
                        println!("{}", message_block(message));
                    }
                }
            }
            Command::Rate { message, score } => {
                self.require_session().await?;
                let message = MessageId::Durable(DurableId::new(message));
                self.pipeline.rate(&message, score).await?;
                println!("Thanks for the feedback.");
            }
            Command::Rename { id, title } => {
                self.require_session().await?;
                self.pipeline
                    .rename(&DurableId::new(id), &title.join(" "))
                    .await?;
            }
            Command::Pin { id } => {
                self.require_session().await?;
                self.pipeline.pin(&DurableId::new(id)).await?;
            }
            Command::Unpin { id } => {
                self.require_session().await?;
                self.pipeline.unpin(&DurableId::new(id)).await?;
            }
            Command::Archive { id } => {
                self.require_session().await?;
                self.pipeline.archive(&DurableId::new(id)).await?;
            }
            Command::Unarchive { id } => {
                self.require_session().await?;
                self.pipeline.unarchive(&DurableId::new(id)).await?;
            }
            Command::Delete { id } => {
                self.require_session().await?;
                self.pipeline.delete(&DurableId::new(id)).await?;
            }
            Command::Share { id } => {
                self.require_session().await?;
                let id = DurableId::new(id);
                if self.pipeline.toggle_public(&id).await? {
                    println!("Shared. Anyone can read it with `talksense show --public {id}`.");
                } else {
                    println!("No longer shared.");
                }
            }
        }
        Ok(())
    }

    async fn signup(&self, args: SignupArgs) -> Result<()> {
        let password = match args.password {
            Some(password) => password,
            None => prompt("Password: ").await?,
        };
        let detail = self
            .auth
            .signup(&SignupRequest {
                email: args.email,
                password,
                first_name: args.first_name,
                last_name: args.last_name,
            })
            .await?;
        println!("{detail}");
        Ok(())
    }

    /// Sends one message and echoes the reply as it streams.
    async fn send(
        &self,
        id: Option<&DurableId>,
        key: Option<ConversationKey>,
        text: &str,
    ) -> Result<SendReport> {
        let store = self.pipeline.store();
        let mut events = store.subscribe();
        let mut echo = ReplyEcho::new();
        let mut stdout = std::io::stdout();

        let send = async {
            match key {
                Some(key) => self.pipeline.send_in(key, text).await,
                None => self.pipeline.send(id, text).await,
            }
        };
        tokio::pin!(send);
        let report = loop {
            tokio::select! {
                report = &mut send => break report?,
                event = events.recv() => match event {
                    Ok(event) => echo.handle(store, &event, &mut stdout)?,
                    Err(RecvError::Lagged(skipped)) => debug!(skipped, "echo lagged"),
                    Err(RecvError::Closed) => {}
                },
            }
        };
        while let Ok(event) = events.try_recv() {
            echo.handle(store, &event, &mut stdout)?;
        }
        echo.finish(store, &report, &mut stdout)?;
        Ok(report)
    }

    async fn interactive(&self, id: Option<DurableId>) -> Result<()> {
        let mut key = match &id {
            Some(id) => Some(self.pipeline.open(id).await?),
            None => None,
        };
        let mut last_reply: Option<MessageId> = None;
        println!("Type a message, `/rate <1-5>` to rate the last reply, `/quit` to leave.");

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            print!("> ");
            std::io::stdout().flush()?;
            let Some(line) = lines.next_line().await? else {
                break;
            };
            let line = line.trim();
            match line {
                "" => continue,
                "/quit" | "/exit" => break,
                _ => {}
            }
            if let Some(score) = line.strip_prefix("/rate") {
                let Some(reply) = &last_reply else {
                    println!("Nothing to rate yet.");
                    continue;
                };
                let outcome = match score.trim().parse::<u8>() {
                    Ok(score) => self.pipeline.rate(reply, score).await,
                    Err(_) => {
                        println!("Usage: /rate <1-5>");
                        continue;
                    }
                };
                match outcome {
                    Ok(()) => println!("Thanks for the feedback."),
                    Err(err) => println!("{}", err.user_message()),
                }
                continue;
            }

            let report = match self.send(id.as_ref(), key, line).await {
                Ok(report) => report,
                Err(err) => {
                    println!("{}", crate::describe(&err));
                    continue;
                }
            };
            key = Some(report.conversation);
            last_reply = Some(report.assistant.clone());
            if report.forces_logout() {
                bail!("Your session has expired. Please sign in again.");
            }
        }
        Ok(())
    }
}

/// The echo already printed a failed reply, so only a forced sign-out adds
/// its own message.
fn reply_outcome(report: SendReport) -> Result<()> {
    match report.error {
        None => Ok(()),
        Some(err) if err.forces_logout() => Err(err.into()),
        Some(_) => Err(AlreadyReported.into()),
    }
}

async fn prompt(label: &str) -> Result<String> {
    print!("{label}");
    std::io::stdout().flush()?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    lines
        .next_line()
        .await?
        .map(|line| line.trim_end().to_string())
        .ok_or_else(|| anyhow!("no input"))
}

/// Resolves settings, applies command-line overrides and runs the command.
pub async fn run(cli: Cli) -> Result<()> {
    let mut settings = ClientSettings::load().map_err(|err| anyhow!(err.user_message()))?;
    if let Some(api) = &cli.api {
        settings = settings
            .with_base_url(api)
            .map_err(|err| anyhow!(err.user_message()))?;
    }
    debug!(base_url = %settings.base_url, "settings resolved");
    let client = Client::from_settings(&settings)?;
    client.execute(cli.command).await
}

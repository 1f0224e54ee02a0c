use std::sync::Arc;
use std::time::Duration;

use anyhow::Error;
use console::{Term, style};
use dialoguer::{Confirm, Input, Password, Select, theme::ColorfulTheme};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, trace, warn};
use uuid::Uuid;

use board_profile::config::AppConfig;
use board_profile::favorite::Favorite;
use board_profile::logger::{Logger, OperationStatus};
use board_profile::login::{LoginError, LoginOutcome};
use board_profile::profile::{Profile, ProfileOptions};
use board_profile::transport::{NetworkConfig, NetworkError, ReqwestTransport, Transport};

/// The name of the current program.
pub(crate) const NAME: &str = env!("CARGO_PKG_NAME");

/// The current version of the program.
pub(crate) const VERSION: &str = env!("CARGO_PKG_VERSION");

const MENU: &[&str] = &[
    "List favorites",
    "Add favorite",
    "Remove favorite",
    "Add blacklist rule",
    "Test tags against blacklist",
    "Check a downloaded file hash",
    "Set site credentials",
    "Log in to a site",
    "Purge temporary files",
    "Sync and exit",
];

pub(crate) struct Program {
    config: AppConfig,
    logger: Logger,
    term: Term,
    theme: ColorfulTheme,
}

impl Program {
    pub(crate) fn new(config: AppConfig, logger: Logger) -> Self {
        Program {
            config,
            logger,
            term: Term::stdout(),
            theme: ColorfulTheme::default(),
        }
    }

    pub(crate) async fn run(&self) -> Result<(), Error> {
        self.term.set_title(NAME);
        trace!("Starting {} {}", NAME, VERSION);

        let transport: Arc<dyn Transport> =
            Arc::new(ReqwestTransport::with_config(NetworkConfig::from(&self.config))?);
        let mut profile = Profile::open(
            &self.config.paths.profile_directory,
            transport,
            ProfileOptions::from(&self.config),
        )?;
        self.logger
            .log_system_event("profile_opened", &profile.path().display().to_string());

        loop {
            let choice = Select::with_theme(&self.theme)
                .with_prompt("What would you like to do?")
                .items(MENU)
                .default(0)
                .interact()?;

            match choice {
                0 => self.list_favorites(&profile)?,
                1 => self.add_favorite(&mut profile)?,
                2 => self.remove_favorite(&mut profile)?,
                3 => self.add_blacklist_rule(&mut profile)?,
                4 => self.test_blacklist(&profile)?,
                5 => self.check_hash(&profile)?,
                6 => self.set_credentials(&profile)?,
                7 => self.login(&profile).await?,
                8 => self.purge_temp(&profile)?,
                _ => break,
            }
        }

        self.logger.log_sync(profile.path(), OperationStatus::Started);
        match profile.sync() {
            Ok(()) => self.logger.log_sync(profile.path(), OperationStatus::Completed),
            Err(e) => {
                self.logger.log_sync(profile.path(), OperationStatus::Failed);
                return Err(e.into());
            }
        }
        info!("Exiting...");
        Ok(())
    }

    fn list_favorites(&self, profile: &Profile) -> Result<(), Error> {
        if profile.favorites().is_empty() {
            self.term.write_line("No favorites yet.")?;
            return Ok(());
        }
        for favorite in profile.favorites() {
            self.term.write_line(&format!(
                "{}  (last viewed {})",
                style(&favorite.tag).cyan(),
                favorite.last_viewed.format("%Y-%m-%d %H:%M")
            ))?;
        }
        Ok(())
    }

    fn add_favorite(&self, profile: &mut Profile) -> Result<(), Error> {
        let tag: String = Input::with_theme(&self.theme)
            .with_prompt("Tag")
            .interact_text()?;
        let tag = tag.trim();
        if !tag.is_empty() {
            profile.add_favorite(Favorite::new(tag));
        }
        Ok(())
    }

    fn remove_favorite(&self, profile: &mut Profile) -> Result<(), Error> {
        let tags: Vec<String> = profile.favorites().iter().map(|f| f.tag.clone()).collect();
        if tags.is_empty() {
            self.term.write_line("No favorites yet.")?;
            return Ok(());
        }
        let index = Select::with_theme(&self.theme)
            .with_prompt("Favorite to remove")
            .items(&tags[..])
            .interact()?;
        let confirmed = Confirm::with_theme(&self.theme)
            .with_prompt(format!("Remove '{}'?", tags[index]))
            .default(false)
            .interact()?;
        if confirmed {
            profile.remove_favorite(&tags[index]);
        }
        Ok(())
    }

    fn add_blacklist_rule(&self, profile: &mut Profile) -> Result<(), Error> {
        let rule: String = Input::with_theme(&self.theme)
            .with_prompt("Blacklist rule (space separated tags)")
            .interact_text()?;
        if !profile.add_blacklist(&rule) {
            warn!("Blacklist rule '{}' was not added", rule);
            self.term.write_line("Rule is empty, invalid or already present.")?;
        }
        Ok(())
    }

    fn test_blacklist(&self, profile: &Profile) -> Result<(), Error> {
        let tags: String = Input::with_theme(&self.theme)
            .with_prompt("Post tags")
            .interact_text()?;
        let blocked = profile.is_blacklisted(tags.split_whitespace());
        let verdict = if blocked {
            style("blacklisted").red()
        } else {
            style("allowed").green()
        };
        self.term.write_line(&format!("Post is {}", verdict))?;
        Ok(())
    }

    fn check_hash(&self, profile: &Profile) -> Result<(), Error> {
        let hash: String = Input::with_theme(&self.theme)
            .with_prompt("MD5")
            .interact_text()?;
        let target: String = Input::with_theme(&self.theme)
            .with_prompt("Target path")
            .interact_text()?;

        let (action, existing) = profile.md5_action(hash.trim(), target.trim());
        self.logger
            .log_dedup(hash.trim(), target.trim(), action, existing.as_deref());
        match existing {
            Some(path) => self
                .term
                .write_line(&format!("{} (already stored at {})", action, path))?,
            None => self.term.write_line(&action.to_string())?,
        }
        Ok(())
    }

    fn pick_site(&self, profile: &Profile) -> Result<Option<String>, Error> {
        let ids: Vec<String> = profile.sites().iter().map(|s| s.id().to_string()).collect();
        if ids.is_empty() {
            self.term.write_line("No sites configured.")?;
            return Ok(None);
        }
        let index = Select::with_theme(&self.theme)
            .with_prompt("Site")
            .items(&ids[..])
            .interact()?;
        Ok(Some(ids[index].clone()))
    }

    fn set_credentials(&self, profile: &Profile) -> Result<(), Error> {
        let Some(id) = self.pick_site(profile)? else {
            return Ok(());
        };
        let Some(site) = profile.site(&id) else {
            return Ok(());
        };
        let pseudo: String = Input::with_theme(&self.theme)
            .with_prompt("Username")
            .interact_text()?;
        let password = Password::with_theme(&self.theme)
            .with_prompt("Password")
            .interact()?;
        site.settings().set_string("auth/pseudo", &pseudo);
        site.settings().set_string("auth/password", &password);
        site.settings().sync()?;
        Ok(())
    }

    async fn login(&self, profile: &Profile) -> Result<(), Error> {
        let Some(id) = self.pick_site(profile)? else {
            return Ok(());
        };
        let Some(login) = profile.login_for(&id)? else {
            self.term.write_line("This site has no login configured.")?;
            return Ok(());
        };

        let attempt = Uuid::new_v4();
        let kind = login.kind().to_string();
        self.logger
            .log_login(attempt, &id, &kind, OperationStatus::Started, None);

        let spinner = ProgressBar::new_spinner();
        spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}")?);
        spinner.set_message(format!("Logging in to {}...", id));
        spinner.enable_steady_tick(Duration::from_millis(100));

        let result = match login.login() {
            Ok(pending) => pending.wait().await,
            Err(e) => Err(e),
        };

        match result {
            Ok(LoginOutcome::Authenticated) => {
                self.logger
                    .log_login(attempt, &id, &kind, OperationStatus::Completed, None);
                spinner.finish_with_message(format!("Logged in to {}", id));
            }
            Ok(LoginOutcome::Rejected { status }) => {
                self.logger
                    .log_login(attempt, &id, &kind, OperationStatus::Rejected, Some(status));
                spinner.finish_with_message(format!("{} rejected the credentials ({})", id, status));
            }
            Err(LoginError::Network(NetworkError::Cancelled)) => {
                self.logger
                    .log_login(attempt, &id, &kind, OperationStatus::Cancelled, None);
                spinner.finish_with_message("Login cancelled");
            }
            Err(e) => {
                self.logger
                    .log_login(attempt, &id, &kind, OperationStatus::Failed, None);
                self.logger.log_error("login", &e.to_string(), Some(&id));
                spinner.finish_with_message(format!("Login failed: {}", e));
            }
        }
        Ok(())
    }

    fn purge_temp(&self, profile: &Profile) -> Result<(), Error> {
        let report = profile.purge_temp(profile.options().temp_max_age_secs);
        self.term.write_line(&format!(
            "Removed {} file(s), kept {}, failed {}",
            report.removed, report.kept, report.failed
        ))?;
        Ok(())
    }
}

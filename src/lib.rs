pub mod api;
pub mod chat;
pub mod config;
pub mod db;
pub mod notify;
pub mod session;
pub mod verify;

pub use db::DbPool;

use std::sync::Arc;

use crate::chat::MessageService;
use crate::config::Config;
use crate::db::{AccountStore, Stores};
use crate::notify::Dispatcher;
use crate::session::SessionIssuer;
use crate::verify::{VerificationService, VerifyPolicy};

pub struct AppState {
    pub config: Config,
    pub accounts: Arc<dyn AccountStore>,
    pub verification: VerificationService,
    pub sessions: SessionIssuer,
    pub chat: MessageService,
}

impl AppState {
    pub fn new(config: Config, stores: Stores, dispatcher: Arc<dyn Dispatcher>) -> Self {
        let policy = VerifyPolicy::from_config(&config.auth, &config.delivery);
        let verification = VerificationService::new(
            stores.accounts.clone(),
            stores.codes.clone(),
            dispatcher,
            policy,
        );
        let sessions =
            SessionIssuer::new(&config.auth.session_secret, config.auth.session_ttl_days);
        let chat = MessageService::new(stores.conversations.clone());

        Self {
            config,
            accounts: stores.accounts,
            verification,
            sessions,
            chat,
        }
    }
}

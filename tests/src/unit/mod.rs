mod conversation_tests;
mod session_tests;

use std::path::Path;
use std::sync::Arc;
use talksense_core::{
    AuthService, ClientSettings, ConversationStore, FileCredentialStorage, MessagePipeline,
    Transport,
};

pub(crate) fn test_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime")
}

/// A client wired the way the binary wires it, with credentials in `path`.
pub(crate) struct Harness {
    pub auth: AuthService,
    pub pipeline: MessagePipeline,
}

impl Harness {
    pub fn new(base_url: &str, path: &Path) -> Self {
        let settings =
            ClientSettings::for_base_url(base_url, path.to_path_buf()).expect("settings");
        let storage = Arc::new(FileCredentialStorage::new(&settings.credentials_path));
        let transport = Transport::from_settings(&settings, storage).expect("transport");
        Self {
            auth: AuthService::new(transport.clone()),
            pipeline: MessagePipeline::new(ConversationStore::new(), transport, settings.chat),
        }
    }
}

//! Реакция на потерю связи, которую менеджер соединения не смог
//! восстановить.
//!
//! `Supervisor` ждёт завершения `ConnectionManager::run`. При
//! `FatalConnectivityError` ровно один раз вызывается `ResetHandler`, а
//! процесс завершается кодом [`RESET_EXIT_CODE`], по которому сервис-менеджер
//! хоста перезапускает его.

use std::{
    fs::OpenOptions,
    future::Future,
    io::Write,
    path::PathBuf,
    sync::Arc,
};

use once_cell::sync::OnceCell;
use psos_error::FatalConnectivityError;
use tokio::sync::Notify;
use tracing::{error, info, warn};

use crate::network::ConnectionManager;

/// Код выхода процесса, запросившего перезапуск (`EX_TEMPFAIL`).
pub const RESET_EXIT_CODE: i32 = 75;

/// Запрос на перезапуск устройства.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetRequest {
    pub reason: String,
}

pub trait ResetHandler: Send + Sync {
    /// Регистрирует запрос. Повторные вызовы возвращают первый запрос.
    fn reset(
        &self,
        reason: &str,
    ) -> ResetRequest;
}

/// Перезапуск через завершение процесса.
///
/// Сам процесс не завершается: `main` ждёт [`ProcessReset::wait`] и выходит
/// с кодом [`RESET_EXIT_CODE`].
#[derive(Debug, Default)]
pub struct ProcessReset {
    request: OnceCell<ResetRequest>,
    notify: Notify,
    log_file: Option<PathBuf>,
}

impl ProcessReset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Причина каждого перезапуска дописывается в `path`.
    pub fn with_log_file(
        mut self,
        path: impl Into<PathBuf>,
    ) -> Self {
        self.log_file = Some(path.into());
        self
    }

    pub fn requested(&self) -> Option<&ResetRequest> {
        self.request.get()
    }

    /// Ждёт первого запроса на перезапуск.
    pub async fn wait(&self) -> ResetRequest {
        loop {
            let notified = self.notify.notified();
            if let Some(request) = self.request.get() {
                return request.clone();
            }
            notified.await;
        }
    }

    fn append_log(
        &self,
        reason: &str,
    ) {
        let Some(path) = &self.log_file else {
            return;
        };
        let line = format!("{} reset: {reason}\n", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"));
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut f| f.write_all(line.as_bytes()));
        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "Failed to record reset reason");
        }
    }
}

impl ResetHandler for ProcessReset {
    fn reset(
        &self,
        reason: &str,
    ) -> ResetRequest {
        let mut first = false;
        let request = self.request.get_or_init(|| {
            first = true;
            ResetRequest {
                reason: reason.to_string(),
            }
        });
        if first {
            error!(reason, "Reset requested");
            self.append_log(reason);
            self.notify.notify_waiters();
        } else {
            info!(reason, "Reset already requested");
        }
        request.clone()
    }
}

/// Превращает фатальные ошибки фоновых задач в запрос перезапуска.
pub struct Supervisor {
    handler: Arc<dyn ResetHandler>,
}

impl Supervisor {
    pub fn new(handler: Arc<dyn ResetHandler>) -> Self {
        Self { handler }
    }

    /// Запускает менеджер соединения и ждёт его завершения.
    pub async fn run(
        &self,
        manager: ConnectionManager,
    ) -> Option<ResetRequest> {
        self.watch(manager.run()).await
    }

    /// `None`, если задача завершилась штатно.
    pub async fn watch<F>(
        &self,
        task: F,
    ) -> Option<ResetRequest>
    where
        F: Future<Output = Result<(), FatalConnectivityError>>,
    {
        match task.await {
            Ok(()) => None,
            Err(e) => Some(self.handler.reset(&e.to_string())),
        }
    }
}

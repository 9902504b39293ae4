//! Scripted `AuthApi` for store tests. Every call records the bearer the HTTP client
//! would have sent, read from the same storage.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::client::bearer_token;
use crate::error::{AppError, AppResult};
use crate::storage::SharedStorage;

use super::principal::Identity;
use super::provider::{Ack, AuthApi, AuthGrant, ChangePassword, Credentials, RegisterOutcome, Registration, ResetPassword};

pub enum MeReply {
    Now(AppResult<Identity>),
    Wait(oneshot::Receiver<AppResult<Identity>>),
}

#[derive(Default)]
struct Script {
    login: Option<AppResult<(String, Identity)>>,
    register: Option<(String, Identity)>,
    me: VecDeque<MeReply>,
    impersonation_token: Option<String>,
    logout_error: Option<AppError>,
    calls: Vec<(&'static str, Option<String>)>,
}

pub struct FakeApi {
    storage: SharedStorage,
    script: Mutex<Script>,
}

impl FakeApi {
    pub fn new(storage: SharedStorage) -> Self {
        Self { storage, script: Mutex::new(Script::default()) }
    }

    pub fn set_login(&self, reply: AppResult<(String, Identity)>) { self.script.lock().login = Some(reply); }
    pub fn set_register_grant(&self, grant: (String, Identity)) { self.script.lock().register = Some(grant); }
    pub fn set_impersonation_token(&self, token: &str) { self.script.lock().impersonation_token = Some(token.to_string()); }
    pub fn fail_logout(&self, err: AppError) { self.script.lock().logout_error = Some(err); }
    pub fn push_me(&self, reply: MeReply) { self.script.lock().me.push_back(reply); }

    pub fn calls(&self) -> Vec<(&'static str, Option<String>)> { self.script.lock().calls.clone() }

    pub fn last_bearer(&self) -> Option<String> {
        self.script.lock().calls.last().and_then(|c| c.1.clone())
    }

    fn record(&self, name: &'static str) -> parking_lot::MutexGuard<'_, Script> {
        let bearer = bearer_token(self.storage.as_ref());
        let mut script = self.script.lock();
        script.calls.push((name, bearer));
        script
    }
}

fn offline() -> AppError { AppError::network("network_unavailable", "fake backend has no reply") }

#[async_trait]
impl AuthApi for FakeApi {
    async fn login(&self, _creds: &Credentials) -> AppResult<AuthGrant> {
        let reply = self.record("login").login.clone().unwrap_or_else(|| Err(offline()));
        reply.map(|(token, identity)| AuthGrant { token, identity })
    }

    async fn register(&self, _reg: &Registration) -> AppResult<RegisterOutcome> {
        let grant = self.record("register").register.clone();
        Ok(RegisterOutcome {
            grant: grant.map(|(token, identity)| AuthGrant { token, identity }),
            message: Some("Registration successful. Please log in.".into()),
        })
    }

    async fn me(&self) -> AppResult<Identity> {
        let reply = {
            let mut script = self.record("me");
            match script.me.pop_front() {
                Some(r) => r,
                None => MeReply::Now(match &script.login {
                    Some(Ok((_, id))) => Ok(id.clone()),
                    _ => Err(offline()),
                }),
            }
        };
        match reply {
            MeReply::Now(r) => r,
            MeReply::Wait(rx) => rx.await.unwrap_or_else(|_| Err(offline())),
        }
    }

    async fn profile(&self) -> AppResult<Identity> {
        let script = self.record("profile");
        match &script.login {
            Some(Ok((_, id))) => Ok(id.clone()),
            _ => Err(offline()),
        }
    }

    async fn logout(&self) -> AppResult<()> {
        match self.record("logout").logout_error.clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn forgot_password(&self, _email: &str) -> AppResult<Ack> {
        self.record("forgot_password");
        Ok(Ack { message: Some("Reset link sent.".into()) })
    }

    async fn reset_password(&self, _req: &ResetPassword) -> AppResult<Ack> {
        self.record("reset_password");
        Ok(Ack::default())
    }

    async fn change_password(&self, _req: &ChangePassword) -> AppResult<Ack> {
        self.record("change_password");
        Ok(Ack::default())
    }

    async fn impersonate(&self, _tenant_id: i64) -> AppResult<String> {
        let token = self.record("impersonate").impersonation_token.clone();
        // Suspend once so overlapping callers interleave like real requests.
        tokio::task::yield_now().await;
        token.ok_or_else(|| AppError::forbidden("forbidden", "not allowed"))
    }

    async fn exit_impersonation(&self) -> AppResult<()> {
        self.record("exit_impersonation");
        Ok(())
    }
}

//!
//! appseba CLI
//! -----------
//! Drives the session store against a live App Seba backend. Session state is kept
//! in a JSON file so consecutive invocations behave like one signed-in client.

use std::env;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use appseba::client::ApiClient;
use appseba::config::Config;
use appseba::identity::{ChangePassword, Credentials, HttpAuthApi, Registration, ResetPassword, SessionStore};
use appseba::resources::{page, LogFilter, ResourceApi};
use appseba::storage::{FileStorage, SharedStorage};
use appseba::theme::{self, Theme};

fn print_usage(program: &str) {
    eprintln!(
        "Usage:\n  {program} [--api <url>] [--state <file>] <command> [args]\n\nCommands:\n  login <email> <password>                       sign in and persist the session\n  register <name> <email> <password> [--phone <p>] [--address <a>]\n  logout                                         end the session (local state is always cleared)\n  whoami                                         cached identity, no network\n  profile                                        extended profile from the backend\n  refresh                                        re-fetch the identity\n  can <permission>                               capability check against the cached identity\n  can-any <permission>...                        true if any permission is held\n  impersonate <tenant_id>                        super-admins only\n  exit-impersonation\n  guard <path>                                   where a navigation to <path> lands\n  forgot-password <email>\n  reset-password <email> <token> <password> <confirmation>\n  change-password <current> <new> <confirmation>\n  users [--page <n>] [--per-page <n>]\n  logs [--level <l>] [--log-name <n>] [--query <q>] [--page <n>] [--per-page <n>]\n  theme [dark|light|toggle]\n  watch                                          follow session changes made by other processes until Ctrl-C\n  status                                         configuration and session state\n\nEnvironment:\n  SEBA_API_URL             API base URL (default: http://localhost:8000/api)\n  SEBA_STATE_FILE          session file (default: .appseba/session.json)\n  SEBA_HTTP_TIMEOUT_SECS   request timeout (default: 30)\n  SEBA_STORAGE_POLL_MS     storage poll interval (default: 1000)\n  RUST_LOG                 log filter (default: info)"
    );
}

// Value following `--name` among the command's trailing arguments.
fn flag(args: &[String], name: &str) -> Option<String> {
    args.iter().position(|a| a == name).and_then(|i| args.get(i + 1)).cloned()
}

fn flag_num(args: &[String], name: &str, default: usize) -> Result<usize> {
    match flag(args, name) {
        None => Ok(default),
        Some(v) => v.parse::<usize>().with_context(|| format!("{} expects a number, got '{}'", name, v)),
    }
}

fn arg<'a>(args: &'a [String], i: usize, what: &str) -> Result<&'a str> {
    args.get(i).map(|s| s.as_str()).ok_or_else(|| anyhow!("missing <{}>", what))
}

fn print_json<T: serde::Serialize>(v: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(v)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .context("invalid log filter")?;
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let args: Vec<String> = env::args().collect();
    let program = args.first().map(|s| s.as_str()).unwrap_or("appseba");

    let mut cfg = Config::from_env()?;
    let mut i = 1usize;
    while i < args.len() {
        match args[i].as_str() {
            "--api" => { i += 1; cfg = cfg.with_api_url(arg(&args, i, "url")?)?; }
            "--state" => { i += 1; cfg.state_file = arg(&args, i, "file")?.into(); }
            "-h" | "--help" => { print_usage(program); return Ok(()); }
            _ => break,
        }
        i += 1;
    }
    let Some(cmd) = args.get(i).cloned() else {
        print_usage(program);
        return Err(anyhow!("missing command"));
    };
    let rest = &args[i + 1..];

    let file = Arc::new(
        FileStorage::open(&cfg.state_file)
            .with_context(|| format!("failed to open session file {}", cfg.state_file.display()))?,
    );
    let storage: SharedStorage = file.clone();
    let client = ApiClient::new(&cfg, storage.clone())?;
    let api = HttpAuthApi::new(client.clone());
    let store = Arc::new(SessionStore::new(Arc::new(api), storage.clone()));
    store.restore();

    match cmd.as_str() {
        "login" => {
            let creds = Credentials::new(arg(rest, 0, "email")?, arg(rest, 1, "password")?);
            let id = store.login(&creds).await?;
            info!(target: "session", user_id = id.id, "login ok");
            println!("signed in as {} <{}>; home {}", id.name, id.email, store.home_path().unwrap_or("/dashboard"));
        }
        "register" => {
            let reg = Registration {
                name: arg(rest, 0, "name")?.to_string(),
                email: arg(rest, 1, "email")?.to_string(),
                password: arg(rest, 2, "password")?.to_string(),
                phone: flag(rest, "--phone"),
                address: flag(rest, "--address"),
            };
            match store.register(&reg).await? {
                Some(id) => println!("registered and signed in as {}", id.email),
                None => println!("registered; sign in to continue"),
            }
        }
        "logout" => {
            let to = store.logout().await;
            println!("signed out; continue at {}", to);
        }
        "whoami" => match store.identity() {
            Some(id) => print_json(id.as_ref())?,
            None => println!("not signed in"),
        },
        "profile" => print_json(&store.profile().await?)?,
        "refresh" => {
            store.start().await;
            match store.identity() {
                Some(id) => print_json(id.as_ref())?,
                None => println!("not signed in"),
            }
        }
        "can" => println!("{}", store.can(arg(rest, 0, "permission")?)),
        "can-any" => println!("{}", store.can_any(rest)),
        "impersonate" => {
            let raw = arg(rest, 0, "tenant_id")?;
            let tenant_id: i64 = raw.parse().with_context(|| format!("tenant id must be numeric, got '{}'", raw))?;
            store.enter_impersonation(tenant_id).await?;
            println!("impersonating tenant {}", tenant_id);
        }
        "exit-impersonation" => {
            store.exit_impersonation().await?;
            println!("impersonation ended");
        }
        "guard" => {
            let path = arg(rest, 0, "path")?;
            match store.guard(path).redirect_target() {
                Some(to) => println!("redirect {}", to),
                None => println!("proceed"),
            }
        }
        "forgot-password" => {
            let ack = store.request_password_reset(arg(rest, 0, "email")?).await?;
            println!("{}", ack.message.unwrap_or_else(|| "reset link requested".into()));
        }
        "reset-password" => {
            let req = ResetPassword {
                email: arg(rest, 0, "email")?.to_string(),
                token: arg(rest, 1, "token")?.to_string(),
                password: arg(rest, 2, "password")?.to_string(),
                password_confirmation: arg(rest, 3, "confirmation")?.to_string(),
            };
            let ack = store.reset_password(&req).await?;
            println!("{}", ack.message.unwrap_or_else(|| "password reset".into()));
        }
        "change-password" => {
            let req = ChangePassword {
                current_password: arg(rest, 0, "current")?.to_string(),
                password: arg(rest, 1, "new")?.to_string(),
                password_confirmation: arg(rest, 2, "confirmation")?.to_string(),
            };
            let ack = store.change_password(&req).await?;
            println!("{}", ack.message.unwrap_or_else(|| "password changed".into()));
        }
        "users" => {
            let page_no = flag_num(rest, "--page", 1)? as u32;
            let per_page = flag_num(rest, "--per-page", 10)? as u32;
            let listing = ResourceApi::new(client).users(page_no, per_page).await?;
            for u in &listing.items {
                let roles: Vec<&str> = u.roles.iter().map(|r| r.as_str()).collect();
                println!("{:>6}  {:<24} {:<32} {}", u.id, u.name, u.email, roles.join(","));
            }
            if let Some(meta) = &listing.meta {
                println!("page {}/{} ({} total)", meta.current_page, meta.last_page, meta.total);
            }
        }
        "logs" => {
            let entries = ResourceApi::new(client).logs().await?;
            let filter = LogFilter {
                query: flag(rest, "--query").unwrap_or_default(),
                level: flag(rest, "--level"),
                log_name: flag(rest, "--log-name"),
            };
            let matched = filter.apply(&entries);
            let per_page = flag_num(rest, "--per-page", 10)?.max(1);
            let total = page::log_total_pages(matched.len(), per_page);
            let current = page::log_effective_page(flag_num(rest, "--page", 1)?, total);
            let offset = (current - 1) * per_page;
            for (n, e) in page::page_slice(&matched, current, per_page).iter().enumerate() {
                println!("{:>5}  {}  {:<16} {:<14} {:<8} {}", e.display_id(offset + n), e.formatted_time(), e.actor, e.action, e.level, e.message);
            }
            let (from, to) = page::showing_range(matched.len(), current, per_page);
            println!("showing {} to {} of {} (page {}/{})", from, to, matched.len(), current, total);
        }
        "theme" => {
            let t = match rest.first().map(|s| s.as_str()) {
                None => theme::current(storage.as_ref(), false),
                Some("toggle") => theme::toggle(storage.as_ref(), false)?,
                Some(name) => {
                    let t: Theme = name.parse()?;
                    theme::set(storage.as_ref(), t)?;
                    t
                }
            };
            println!("{}", t);
        }
        "watch" => {
            let poller = file.spawn_poller(cfg.storage_poll);
            let watcher = store.watch_storage();
            let mut events = store.subscribe();
            info!(target: "session", poll_ms = cfg.storage_poll.as_millis() as u64, "following {}", cfg.state_file.display());
            loop {
                tokio::select! {
                    ev = events.recv() => match ev {
                        Ok(ev) => println!("{:?}  state={:?}", ev, store.state()),
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    },
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
            poller.abort();
            watcher.abort();
        }
        "status" => {
            println!("api:    {}", cfg.api_url);
            println!("state:  {}", cfg.state_file.display());
            println!("session: {:?}", store.state());
            if let Some(id) = store.identity() {
                println!("user:   {} <{}> super_admin={}", id.name, id.email, id.is_super_admin);
            }
        }
        other => {
            print_usage(program);
            return Err(anyhow!("unknown command: {}", other));
        }
    }

    Ok(())
}

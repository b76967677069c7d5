use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;

use gort::adapter::loopback::LoopbackAdapter;
use gort::adapter::{AdapterEvent, EventKind, RenderedMessage};
use gort::model::bundle::BundleFile;
use gort::model::user::User;
use gort::persistence::Persistence;
use gort::router::Router;

const DEMO_ADAPTER: &str = "loopback";
const DEMO_PROVIDER_ID: &str = "demo";

const BUILTIN_BUNDLE: &str = r#"
gort_bundle_version: 1
name: gort
version: "0.1.0"
description: Built-in commands available out of the box.
templates:
  command: "{{response.out}}"
  command_error: "error: {{response.err}}"
commands:
  echo:
    description: Echoes its arguments back.
    executable: ["/bin/echo"]
    rules: ["allow"]
  whoami:
    description: Prints the invoking gort username.
    executable: ["/bin/sh", "-c", "echo $GORT_CHAT_HANDLE"]
    rules: ["allow"]
"#;

/// Installs the built-in demo bundle and an admin user mapped to the
/// loopback adapter, if neither already exists. Lets `gort demo` work
/// immediately on a fresh `$GORT_HOME` without any prior setup.
pub async fn ensure_bootstrap(persistence: &Arc<dyn Persistence>) -> Result<()> {
    if persistence.user_by_username(gort::model::user::ADMIN_USERNAME).await?.is_none() {
        let mut user = User {
            username: gort::model::user::ADMIN_USERNAME.to_string(),
            email: "admin@localhost".to_string(),
            full_name: "Administrator".to_string(),
            password_hash: String::new(),
            mappings: Default::default(),
        };
        user.mappings.insert(DEMO_ADAPTER.to_string(), DEMO_PROVIDER_ID.to_string());
        persistence.user_upsert(user).await?;
    }

    let bundles = persistence.bundles_all().await?;
    if !bundles.iter().any(|b| b.name == "gort") {
        let file = BundleFile::parse(BUILTIN_BUNDLE)?;
        let bundle = file.into_bundle(gort::model::user::ADMIN_USERNAME.to_string(), Utc::now());
        let name = bundle.name.clone();
        let version = bundle.version.clone();
        persistence.bundle_install(bundle).await?;
        persistence.bundle_enable(&name, &version).await?;
    }

    Ok(())
}

/// A REPL that reads chat-typed command lines from stdin and feeds
/// them through the router as the `demo` user in the `loopback`
/// channel — real chat-provider wire protocols are out of scope (§6),
/// so this is how the pipeline gets exercised interactively.
pub async fn run(router: Arc<Router>, adapter: Arc<LoopbackAdapter>) -> Result<()> {
    router.register_adapter(adapter.clone()).await;

    println!("gort demo — type a command (e.g. `echo hello`), Ctrl-D to quit");
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    loop {
        print!("> ");
        stdout.flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let text = line.trim();
        if text.is_empty() {
            continue;
        }

        let event = AdapterEvent {
            channel: "demo".to_string(),
            provider_user_id: DEMO_PROVIDER_ID.to_string(),
            text: text.to_string(),
            kind: EventKind::MessageDirect,
        };
        router.handle(DEMO_ADAPTER, event).await;

        for (_, message) in adapter.take_sent() {
            print_message(message);
        }
    }
    Ok(())
}

fn print_message(message: RenderedMessage) {
    match message {
        RenderedMessage::Text(t) => println!("{t}"),
        RenderedMessage::PreformattedBlock(t) => println!("```\n{t}\n```"),
        RenderedMessage::Fields(fields) => {
            for (k, v) in fields {
                println!("{k}: {v}");
            }
        }
    }
}

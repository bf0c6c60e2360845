//! Login and logout command handlers.

use std::io::{self, BufRead, IsTerminal, Read, Write};
use std::net::TcpListener;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use rally_core::auth::pkce::{self, LOCAL_CALLBACK_PATH, mask_token};
use rally_core::auth::{CheckOutcome, SessionEventRx};
use rally_core::config::Config;
use rally_types::{AccessPhase, Session};

use super::{Reconciler, access_core, reconcile};

const CALLBACK_TIMEOUT: Duration = Duration::from_secs(120);

pub async fn login_password(config: &Config, email: &str, password: Option<String>) -> Result<()> {
    let password = match password {
        Some(password) => password,
        None => read_password()?,
    };
    if password.is_empty() {
        anyhow::bail!("Password cannot be empty");
    }

    let reconciler = access_core(config)?;
    let tracker = reconciler.tracker();
    let mut events = tracker.subscribe();

    let session = tracker
        .sign_in_with_password(email, &password)
        .await
        .context("sign in")?;

    print_signed_in(&session);
    finish_login(&reconciler, &mut events).await;
    Ok(())
}

pub async fn login_oauth(config: &Config, identity_provider: &str) -> Result<()> {
    let reconciler = access_core(config)?;
    let tracker = reconciler.tracker();
    let mut events = tracker.subscribe();

    let pkce = pkce::generate_pkce();
    let callback_port = match config.auth.redirect_port {
        0 => pkce::random_local_port(),
        port => port,
    };
    let redirect_uri = pkce::build_redirect_uri(callback_port);
    let auth_url = tracker.authorize_url(identity_provider, &redirect_uri, &pkce)?;

    println!("To sign in with {identity_provider}:");
    println!();
    println!("  1. A browser window will open (or visit the URL below)");
    println!("  2. Sign in and authorize Rally");
    println!("  3. If redirected to localhost, return here to continue");
    println!("  4. Otherwise, paste the authorization code or redirect URL");
    println!();
    println!("Authorization URL:");
    println!("  {auth_url}");
    println!();

    // Try to open browser (best effort, skip in tests)
    if std::env::var("RALLY_NO_BROWSER").is_err() {
        let _ = open::that(&auth_url);
    }

    // Prefer local callback in interactive sessions, fall back to manual paste.
    let local_code = if io::stdin().is_terminal() {
        wait_for_local_code(callback_port)
    } else {
        None
    };
    let auth_code = match local_code {
        Some(code) => code,
        None => {
            print!("Paste authorization code (or full redirect URL): ");
            io::stdout().flush()?;

            let mut input = String::new();
            io::stdin().lock().read_line(&mut input)?;
            pkce::parse_authorization_input(&input)
                .ok_or_else(|| anyhow::anyhow!("Authorization code cannot be empty"))?
        }
    };

    println!("Exchanging code for a session...");
    let session = tracker
        .complete_oauth(&auth_code, &pkce.verifier)
        .await
        .context("complete sign-in")?;

    print_signed_in(&session);
    finish_login(&reconciler, &mut events).await;
    Ok(())
}

pub async fn logout(config: &Config) -> Result<()> {
    let reconciler = access_core(config)?;
    let store = reconciler.tracker().provider().store();
    let had_session = store.load().context("read session")?.is_some();

    reconciler.logout().await;

    if had_session {
        println!("✓ Signed out");
        println!("  Session removed from: {}", store.path().display());
    } else {
        println!("Not signed in (no session found).");
    }
    Ok(())
}

fn print_signed_in(session: &Session) {
    println!();
    println!(
        "✓ Signed in as {} (token: {})",
        session.email.as_deref().unwrap_or(&session.subject),
        mask_token(&session.access_token)
    );
}

async fn finish_login(reconciler: &Reconciler, events: &mut SessionEventRx) {
    let outcome = reconcile(reconciler, events).await;
    let state = reconciler.snapshot();
    match state.phase() {
        AccessPhase::Registered => {
            if let Some(role) = state.resolved_role {
                println!("  Registered as: {}", role.label());
            }
        }
        AccessPhase::NeedsRegistration => {
            if outcome == CheckOutcome::Failed {
                println!("  Could not reach the backend to confirm registration.");
            }
            println!("  Registration required: run `rally register --role <user|organization>`");
        }
        AccessPhase::NoSession | AccessPhase::CheckPending => {
            println!("  Access: {}", state.phase().label());
        }
    }
}

fn read_password() -> Result<String> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        print!("Password: ");
        io::stdout().flush()?;
    }
    let mut line = String::new();
    stdin.lock().read_line(&mut line).context("read password")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Waits for the provider redirect on `127.0.0.1:<port>` and returns its code.
fn wait_for_local_code(port: u16) -> Option<String> {
    let listener = TcpListener::bind(("127.0.0.1", port)).ok()?;
    let _ = listener.set_nonblocking(true);

    let (tx, rx) = std::sync::mpsc::channel::<Option<String>>();

    std::thread::spawn(move || {
        let start = Instant::now();
        loop {
            match listener.accept() {
                Ok((mut stream, _)) => {
                    let mut buffer = [0u8; 4096];
                    let _ = stream.read(&mut buffer);
                    let request = String::from_utf8_lossy(&buffer);
                    let code = extract_code_from_request(&request);
                    let response = if code.is_some() {
                        callback_success_response()
                    } else {
                        callback_error_response()
                    };
                    let _ = stream.write_all(response.as_bytes());
                    // Browsers probe for favicons; keep listening for the real redirect.
                    if code.is_some() {
                        let _ = tx.send(code);
                        break;
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    if start.elapsed() > CALLBACK_TIMEOUT {
                        let _ = tx.send(None);
                        break;
                    }
                    std::thread::sleep(Duration::from_millis(100));
                }
                Err(_) => {
                    let _ = tx.send(None);
                    break;
                }
            }
        }
    });

    rx.recv_timeout(CALLBACK_TIMEOUT).ok().flatten()
}

fn extract_code_from_request(request: &str) -> Option<String> {
    let request_line = request.lines().next()?;
    let mut parts = request_line.split_whitespace();
    let _method = parts.next()?;
    let target = parts.next()?;

    let url = url::Url::parse(&format!("http://localhost{target}")).ok()?;
    if url.path() != LOCAL_CALLBACK_PATH {
        return None;
    }
    pkce::parse_authorization_input(url.as_str())
}

fn callback_success_response() -> String {
    let body = "<!doctype html><html><head><meta charset=\"utf-8\" /><title>Signed in</title></head><body><p>Signed in to Rally. Return to your terminal to continue.</p></body></html>";
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    )
}

fn callback_error_response() -> String {
    let body = "Invalid sign-in callback";
    format!(
        "HTTP/1.1 400 Bad Request\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_code_from_callback_request() {
        let request = "GET /auth/callback?code=abc-123 HTTP/1.1\r\nHost: localhost:50123\r\n\r\n";
        assert_eq!(extract_code_from_request(request).as_deref(), Some("abc-123"));
    }

    #[test]
    fn test_extract_code_rejects_other_paths_and_errors() {
        assert!(extract_code_from_request("GET /favicon.ico HTTP/1.1\r\n\r\n").is_none());
        assert!(
            extract_code_from_request("GET /auth/callback?error=access_denied HTTP/1.1\r\n\r\n")
                .is_none()
        );
    }
}

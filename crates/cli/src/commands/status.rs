//! Session inspection.

use army_command_session::SessionConfig;

use super::{CommandError, Session, describe};

/// Print the session once it has resolved.
///
/// # Errors
///
/// Returns an error if the session does not resolve in time.
#[allow(clippy::print_stdout)]
pub async fn status(config: &SessionConfig) -> Result<(), CommandError> {
    let mut session = Session::open(config).await?;
    let view = session.resolved().await;
    session.close();

    println!("{}", describe(&view?));
    Ok(())
}

/// Print every session change until Ctrl-C.
///
/// Dropped connections show up here as log lines, not as sign-outs, unless
/// they outlast the recovery grace period.
///
/// # Errors
///
/// Returns an error if the session cannot be started.
#[allow(clippy::print_stdout)]
pub async fn watch(config: &SessionConfig) -> Result<(), CommandError> {
    let mut session = Session::open(config).await?;
    println!("{}", describe(&session.views.borrow_and_update()));

    loop {
        tokio::select! {
            changed = session.views.changed() => {
                if changed.is_err() {
                    break;
                }
                println!("{}", describe(&session.views.borrow_and_update()));
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, stopping");
                break;
            }
        }
    }

    session.close();
    Ok(())
}

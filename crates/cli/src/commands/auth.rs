//! Sign-in, registration and sign-out.
//!
//! # Usage
//!
//! ```bash
//! ac-cli login -s 2470-0001
//! ac-cli register -e someone@example.org --password hunter22
//! ac-cli logout
//! ```

use army_command_session::{Credentials, SessionConfig};

use super::{CommandError, Session, describe};

/// Sign in and print the resulting session.
///
/// # Errors
///
/// Returns an error if the identity service rejects the credentials or the
/// session does not settle.
pub async fn login(config: &SessionConfig, credentials: Credentials) -> Result<(), CommandError> {
    let mut session = Session::open(config).await?;
    session.resolved().await?;

    tracing::info!(email = %credentials.account_email(), "Signing in...");
    let result = session.reconciler.login(credentials).await;
    finish_sign_in(session, result).await
}

/// Create an account, sign in to it, and print the resulting session.
///
/// # Errors
///
/// Returns `AuthError::AccountConflict` if the account already exists.
pub async fn register(
    config: &SessionConfig,
    credentials: Credentials,
) -> Result<(), CommandError> {
    let mut session = Session::open(config).await?;
    session.resolved().await?;

    tracing::info!(email = %credentials.account_email(), "Registering...");
    let result = session.reconciler.register(credentials).await;
    finish_sign_in(session, result).await
}

#[allow(clippy::print_stdout)]
async fn finish_sign_in(
    mut session: Session,
    result: Result<(), army_command_session::AuthError>,
) -> Result<(), CommandError> {
    if let Err(e) = result {
        session.close();
        return Err(e.into());
    }

    let expected = session.client.current_identity().await.map(|i| i.uid);
    let view = session
        .wait_for(|view| {
            !view.resolving && view.identity.as_ref().map(|i| &i.uid) == expected.as_ref()
        })
        .await;

    session.close();
    println!("{}", describe(&view?));
    Ok(())
}

/// Sign out.
///
/// The local session is gone even if the identity service cannot be told.
///
/// # Errors
///
/// Returns an error if the persisted credentials could not be removed.
#[allow(clippy::print_stdout)]
pub async fn logout(config: &SessionConfig) -> Result<(), CommandError> {
    let session = Session::open(config).await?;

    let result = session.reconciler.logout().await;
    println!("{}", describe(&session.reconciler.snapshot()));
    session.close();

    result.map_err(Into::into)
}

//! Synthetic users and the Teams ↔ host user mapping.

use bridge_core::{GraphUser, NewUser, PlatformError, PlatformUser};
use link_store::migrations::SYNTHETIC_USERNAME_PREFIX;
use link_store::StoreError;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{debug, error, info};

use crate::context::Context;
use crate::error::{HandlerError, Result};

/// Give up on finding a free username after this many suffixes.
const MAX_USERNAME_ATTEMPTS: usize = 100;

const PASSWORD_LENGTH: usize = 32;

/// True for users owned by a remote cluster and named like our mirrors.
pub fn is_remote_user(user: &PlatformUser) -> bool {
    user.remote_id.as_deref().is_some_and(|id| !id.is_empty())
        && user.username.starts_with(SYNTHETIC_USERNAME_PREFIX)
}

/// Lowercase, ASCII alphanumerics separated by single dashes.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_dash = false;
    for c in text.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c);
        } else {
            pending_dash = true;
        }
    }
    slug
}

/// Username for the mirror of a Teams user.
pub fn synthetic_username(display_name: &str) -> String {
    format!("{SYNTHETIC_USERNAME_PREFIX}{}", slugify(display_name))
}

fn random_password() -> String {
    let body: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(PASSWORD_LENGTH)
        .map(char::from)
        .collect();
    // Satisfy password policies that want every character class.
    format!("{body}aA1!")
}

impl Context {
    /// The host user standing in for `user`.
    ///
    /// Tries the stored link, then a host account with the same email. With
    /// `create`, a synthetic user is created when neither exists; the new
    /// account is linked without a token.
    pub(crate) async fn get_or_create_synthetic_user(
        &self,
        user: &GraphUser,
        create: bool,
    ) -> Result<String> {
        match self.store.teams_to_mattermost_user_id(&user.id).await {
            Ok(id) if !id.is_empty() => return Ok(id),
            Ok(_) => {}
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err.into()),
        }

        let platform_user = match self.sdk.get_user_by_email(&user.mail).await {
            Ok(existing) => existing,
            Err(err) if !create => return Err(err.into()),
            Err(_) => self.create_synthetic_user(user).await?,
        };

        if let Err(err) = self
            .store
            .set_user_info(&platform_user.id, &user.id, None)
            .await
        {
            error!(
                user_id = %platform_user.id,
                teams_user_id = %user.id,
                error = %err,
                "Unable to link the mirror user"
            );
            return Err(err.into());
        }

        Ok(platform_user.id)
    }

    async fn create_synthetic_user(&self, user: &GraphUser) -> Result<PlatformUser> {
        let base = synthetic_username(&user.display_name);
        let mut new_user = NewUser {
            username: base.clone(),
            first_name: user.display_name.clone(),
            email: user.mail.clone(),
            password: random_password(),
            remote_id: Some(self.config.remote_id.clone()),
            email_notifications: false,
        };

        for suffix in 1..=MAX_USERNAME_ATTEMPTS {
            match self.sdk.create_user(new_user.clone()).await {
                Ok(created) => {
                    info!(
                        user_id = %created.id,
                        username = %created.username,
                        teams_user_id = %user.id,
                        "Created synthetic user"
                    );
                    return Ok(created);
                }
                Err(PlatformError::UsernameExists(_)) => {
                    new_user.username = format!("{base}-{suffix}");
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(HandlerError::Platform(PlatformError::UsernameExists(base)))
    }

    /// Deactivate the mirror of a guest, if it is one of ours.
    pub(crate) async fn deactivate_guest(&self, user: &GraphUser) {
        let Ok(mattermost_user_id) = self.get_or_create_synthetic_user(user, false).await else {
            return;
        };

        let platform_user = match self.sdk.get_user(&mattermost_user_id).await {
            Ok(u) => u,
            Err(err) => {
                debug!(user_id = %mattermost_user_id, error = %err, "Unable to load guest user");
                return;
            }
        };

        if !is_remote_user(&platform_user) || !platform_user.is_active() {
            return;
        }

        if let Err(err) = self.sdk.update_user_active(&mattermost_user_id, false).await {
            debug!(user_id = %mattermost_user_id, error = %err, "Unable to deactivate guest user");
        }
    }

    /// Host user linked to a Teams user, or `None`.
    pub(crate) async fn linked_user(&self, ms_teams_user_id: &str) -> Result<Option<String>> {
        match self.store.teams_to_mattermost_user_id(ms_teams_user_id).await {
            Ok(id) if !id.is_empty() => Ok(Some(id)),
            Ok(_) => Ok(None),
            Err(StoreError::NotFound { .. }) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Dummy User"), "dummy-user");
        assert_eq!(slugify("  O'Brien,  Pat  "), "o-brien-pat");
        assert_eq!(slugify("ÄBC"), "bc");
        assert_eq!(slugify("***"), "");
    }

    #[test]
    fn test_synthetic_username() {
        assert_eq!(synthetic_username("Jane Doe"), "msteams_jane-doe");
    }

    #[test]
    fn test_is_remote_user() {
        let mut user = PlatformUser {
            username: "msteams_jane".to_string(),
            remote_id: Some("remote".to_string()),
            ..Default::default()
        };
        assert!(is_remote_user(&user));

        user.remote_id = Some(String::new());
        assert!(!is_remote_user(&user));

        user.remote_id = Some("remote".to_string());
        user.username = "jane".to_string();
        assert!(!is_remote_user(&user));
    }

    #[test]
    fn test_random_password() {
        let a = random_password();
        assert_eq!(a.len(), PASSWORD_LENGTH + 4);
        assert_ne!(a, random_password());
    }
}

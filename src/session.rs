use std::sync::{Arc, RwLock};

use secrecy::{ExposeSecret, SecretString};

use crate::models::{CurrentUser, UserType};

// Which "my appointments" list the current user sees
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppointmentScope {
    Provider(i64),
    Consumer(i64),
    All,
}

#[derive(Default)]
struct SessionState {
    token: Option<SecretString>,
    user: Option<CurrentUser>,
}

/// Signed-in user context, set at login and cleared at logout.
///
/// Cheap to clone; clones share the same underlying record. The core only
/// reads it (form pre-fill, appointment scope, auth header).
#[derive(Clone, Default)]
pub struct SessionContext {
    inner: Arc<RwLock<SessionState>>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn login(&self, token: SecretString, user: CurrentUser) {
        let mut state = self.inner.write().unwrap_or_else(|e| e.into_inner());
        tracing::info!(user_id = user.id, user_type = ?user.user_type, "session started");
        state.token = Some(token);
        state.user = Some(user);
    }

    pub fn logout(&self) {
        let mut state = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if state.user.take().is_some() {
            tracing::info!("session cleared");
        }
        state.token = None;
    }

    pub fn user(&self) -> Option<CurrentUser> {
        let state = self.inner.read().unwrap_or_else(|e| e.into_inner());
        state.user.clone()
    }

    pub fn token(&self) -> Option<SecretString> {
        let state = self.inner.read().unwrap_or_else(|e| e.into_inner());
        state
            .token
            .as_ref()
            .map(|t| SecretString::from(t.expose_secret().to_owned()))
    }

    pub fn is_signed_in(&self) -> bool {
        self.user().is_some()
    }

    pub fn provider_id(&self) -> Option<i64> {
        self.user()
            .filter(|u| u.user_type == UserType::Provider)
            .and_then(|u| u.provider_profile.map(|p| p.id))
    }

    pub fn appointment_scope(&self) -> AppointmentScope {
        match self.user() {
            Some(u) => match (u.user_type, u.provider_profile) {
                (UserType::Provider, Some(profile)) => AppointmentScope::Provider(profile.id),
                (UserType::Provider, None) => AppointmentScope::All,
                (UserType::Consumer, _) => AppointmentScope::Consumer(u.id),
            },
            None => AppointmentScope::All,
        }
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("user", &self.user().map(|u| u.id))
            .finish()
    }
}

#[cfg(test)]
pub(crate) fn test_user(user_type: UserType) -> CurrentUser {
    use crate::models::ProviderProfile;

    CurrentUser {
        id: 11,
        user_type,
        email: Some("sam@example.com".into()),
        phone_number: Some("555-0100".into()),
        street_address: Some("12 Elm St".into()),
        apartment: None,
        city: Some("Springfield".into()),
        state: Some("IL".into()),
        zip_code: Some("62701".into()),
        address: None,
        provider_profile: match user_type {
            UserType::Provider => Some(ProviderProfile { id: 4, business_name: None }),
            UserType::Consumer => None,
        },
    }
}

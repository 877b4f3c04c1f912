//! Room lookup, on-demand creation and password verification.
//!
//! Directory and hashing calls block, so each runs on the blocking pool.

use std::sync::Arc;

use metrics::counter;
use salon_core::{CredentialVerifier, Room, RoomDirectory, RoomIdentifier};
use secrecy::ExposeSecret;
use tracing::{error, info, instrument};

use crate::errors::ConnectError;
use crate::metrics::ROOMS_CREATED_TOTAL;
use crate::params::ConnectParams;

/// Decides whether a connection may join a room.
#[derive(Clone)]
pub struct Authenticator {
    directory: Arc<dyn RoomDirectory>,
    verifier: Arc<dyn CredentialVerifier>,
}

impl Authenticator {
    pub fn new(directory: Arc<dyn RoomDirectory>, verifier: Arc<dyn CredentialVerifier>) -> Self {
        Self {
            directory,
            verifier,
        }
    }

    /// Resolve the room a client asked for.
    ///
    /// - Room exists: the password must verify against the stored hash.
    /// - Room missing: created with the identifier as its name when `create`
    ///   is set and a password was given; refused otherwise.
    #[instrument(skip_all, fields(room = %identifier, username = %params.username))]
    pub async fn authenticate(
        &self,
        identifier: &RoomIdentifier,
        params: ConnectParams,
    ) -> Result<Room, ConnectError> {
        let result = self.resolve(identifier, params).await;
        match &result {
            Ok(_) => {}
            Err(ConnectError::Unavailable(msg)) => error!(error = %msg, "authentication backend failed"),
            Err(err) => info!(reason = err.reason(), "connection refused"),
        }
        result
    }

    async fn resolve(
        &self,
        identifier: &RoomIdentifier,
        params: ConnectParams,
    ) -> Result<Room, ConnectError> {
        let directory = Arc::clone(&self.directory);
        let lookup = identifier.clone();
        let found = tokio::task::spawn_blocking(move || directory.find_room(&lookup)).await??;

        match found {
            Some(room) => {
                let Some(password) = params.password else {
                    return Err(ConnectError::Unauthorized);
                };
                let verifier = Arc::clone(&self.verifier);
                let (verified, room) = tokio::task::spawn_blocking(move || {
                    let ok = verifier.verify_password(password.expose_secret(), &room.password_hash);
                    (ok, room)
                })
                .await?;
                if verified {
                    Ok(room)
                } else {
                    Err(ConnectError::Unauthorized)
                }
            }
            None => {
                let (true, Some(password)) = (params.create, params.password) else {
                    return Err(ConnectError::RoomNotFound);
                };
                let directory = Arc::clone(&self.directory);
                let verifier = Arc::clone(&self.verifier);
                let name = identifier.as_str().to_string();
                let room = tokio::task::spawn_blocking(move || {
                    let hash = verifier.hash_password(password.expose_secret())?;
                    Ok::<_, ConnectError>(directory.create_room(&name, &hash)?)
                })
                .await??;
                counter!(ROOMS_CREATED_TOTAL).increment(1);
                info!(room_id = room.id, "room created on connect");
                Ok(room)
            }
        }
    }
}

use crate::db;
use crate::error::PortalError;
use crate::retry::{with_retry, RetryPolicy};
use crate::store::{RecordStore, Role};
use rusqlite::Connection;
use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

pub const KEY_CREDENTIALS: &str = "session.credentials";
pub const KEY_ROLE: &str = "session.role";
pub const KEY_DISPLAY_NAME: &str = "session.displayName";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user_id: String,
    pub email: String,
    pub role: Role,
    pub display_name: String,
}

/// Opaque marker stored next to the email so a restored session can detect
/// that the account it was created for has been replaced.
pub fn credential_fingerprint(user_id: &str, email: &str) -> String {
    let mut h = Sha256::new();
    h.update(user_id.as_bytes());
    h.update(b"\0");
    h.update(email.trim().to_ascii_lowercase().as_bytes());
    let digest = h.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

pub fn persist(conn: &Connection, session: &Session) -> anyhow::Result<()> {
    db::settings_set_json(
        conn,
        KEY_CREDENTIALS,
        &json!({
            "email": session.email,
            "userId": session.user_id,
            "fingerprint": credential_fingerprint(&session.user_id, &session.email),
        }),
    )?;
    db::settings_set_json(conn, KEY_ROLE, &json!(session.role.as_str()))?;
    db::settings_set_json(conn, KEY_DISPLAY_NAME, &json!(session.display_name))?;
    Ok(())
}

pub fn clear(conn: &Connection) -> anyhow::Result<()> {
    for key in [KEY_CREDENTIALS, KEY_ROLE, KEY_DISPLAY_NAME] {
        db::settings_delete(conn, key)?;
    }
    Ok(())
}

/// Opens a session for an existing user and records it.
pub fn start(
    conn: &Connection,
    store: &dyn RecordStore,
    email: &str,
    policy: RetryPolicy,
) -> Result<Session, PortalError> {
    let user = with_retry(policy, || store.find_user_by_email(email))?;
    let session = Session {
        user_id: user.id.clone(),
        email: user.email.clone(),
        role: user.role,
        display_name: user.name.clone(),
    };
    with_retry(policy, || {
        store.touch_user_login(&user.id, &crate::store::now_timestamp())
    })?;
    persist(conn, &session)?;
    info!(user_id = %session.user_id, role = session.role.as_str(), "session started");
    Ok(session)
}

/// `Ok(None)` means the login step must be shown.
pub fn restore_session(
    conn: &Connection,
    store: &dyn RecordStore,
    policy: RetryPolicy,
) -> Result<Option<Session>, PortalError> {
    let creds = db::settings_get_json(conn, KEY_CREDENTIALS)?;
    let role = db::settings_get_json(conn, KEY_ROLE)?;
    let name = db::settings_get_json(conn, KEY_DISPLAY_NAME)?;

    let (creds, role, name) = match (creds, role, name) {
        (None, None, None) => return Ok(None),
        (Some(c), Some(r), Some(n)) => (c, r, n),
        _ => {
            warn!("incomplete stored session, clearing");
            clear(conn)?;
            return Ok(None);
        }
    };

    let email = creds.get("email").and_then(|v| v.as_str());
    let user_id = creds.get("userId").and_then(|v| v.as_str());
    let fingerprint = creds.get("fingerprint").and_then(|v| v.as_str());
    let role = role.as_str().and_then(Role::parse);
    let (Some(email), Some(user_id), Some(fingerprint), Some(role), Some(display_name)) =
        (email, user_id, fingerprint, role, name.as_str())
    else {
        warn!("malformed stored session, clearing");
        clear(conn)?;
        return Ok(None);
    };

    let user = match with_retry(policy, || store.find_user_by_email(email)) {
        Ok(u) => u,
        Err(PortalError::NotFound { .. }) => {
            info!("stored session user no longer exists, clearing");
            clear(conn)?;
            return Ok(None);
        }
        Err(e) => return Err(e),
    };
    if user.id != user_id || credential_fingerprint(&user.id, &user.email) != fingerprint {
        info!("stored session does not match current account, clearing");
        clear(conn)?;
        return Ok(None);
    }

    Ok(Some(Session {
        user_id: user.id,
        email: user.email,
        role,
        display_name: display_name.to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{NewUser, SqliteStore};

    fn setup() -> (tempfile::TempDir, Connection) {
        let dir = tempfile::tempdir().expect("tempdir");
        let conn = db::open_db(dir.path()).expect("open");
        (dir, conn)
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            attempts: 1,
            delay: std::time::Duration::ZERO,
        }
    }

    #[test]
    fn nothing_stored_means_no_session() {
        let (_dir, conn) = setup();
        let store = SqliteStore::new(&conn);
        assert_eq!(restore_session(&conn, &store, policy()).expect("restore"), None);
    }

    #[test]
    fn start_persist_restore_clear() {
        let (_dir, conn) = setup();
        let store = SqliteStore::new(&conn);
        let school = store.insert_school("Green Valley", "GV01").expect("school");
        store
            .insert_user(&NewUser {
                school_id: school.id,
                name: "Mrs. Iyer".into(),
                email: "iyer@gv.test".into(),
                role: Role::Principal,
            })
            .expect("user");

        let started = start(&conn, &store, "IYER@gv.test", policy()).expect("start");
        assert_eq!(started.role, Role::Principal);
        let user = store.find_user_by_email("iyer@gv.test").expect("user");
        assert!(user.last_login_at.is_some());

        let restored = restore_session(&conn, &store, policy())
            .expect("restore")
            .expect("session");
        assert_eq!(restored, started);

        clear(&conn).expect("clear");
        assert_eq!(restore_session(&conn, &store, policy()).expect("restore"), None);
    }

    #[test]
    fn partial_or_stale_sessions_are_cleared() {
        let (_dir, conn) = setup();
        let store = SqliteStore::new(&conn);
        db::settings_set_json(&conn, KEY_ROLE, &json!("teacher")).expect("set");
        assert_eq!(restore_session(&conn, &store, policy()).expect("restore"), None);
        assert_eq!(db::settings_get_json(&conn, KEY_ROLE).expect("get"), None);

        persist(
            &conn,
            &Session {
                user_id: "gone".into(),
                email: "gone@gv.test".into(),
                role: Role::Teacher,
                display_name: "Gone".into(),
            },
        )
        .expect("persist");
        assert_eq!(restore_session(&conn, &store, policy()).expect("restore"), None);
        assert_eq!(db::settings_get_json(&conn, KEY_CREDENTIALS).expect("get"), None);
    }

    #[test]
    fn unknown_email_is_not_found() {
        let (_dir, conn) = setup();
        let store = SqliteStore::new(&conn);
        let err = start(&conn, &store, "who@gv.test", policy()).expect_err("no user");
        assert_eq!(err.code(), "not_found");
    }
}

use super::{get_opt_str, get_required_str, to_json, with_conn};
use crate::error::PortalError;
use crate::ipc::types::{AppState, Request};
use crate::retry::with_retry;
use crate::store::{NewStudent, NewUser, RecordStore, Role, SqliteStore};
use rusqlite::Connection;
use serde_json::{json, Value};
use tracing::info;

fn schools_create(conn: &Connection, params: &Value) -> Result<Value, PortalError> {
    let name = get_required_str(params, "name")?;
    let code = get_required_str(params, "code")?.to_ascii_uppercase();
    let school = SqliteStore::new(conn).insert_school(&name, &code)?;
    info!(school_id = %school.id, code = %school.code, "school created");
    Ok(json!({ "school": to_json(&school)? }))
}

fn schools_lookup(conn: &Connection, params: &Value) -> Result<Value, PortalError> {
    let code = get_required_str(params, "code")?;
    let policy = super::setup::retry_policy(conn)?;
    let store = SqliteStore::new(conn);
    let school = with_retry(policy, || store.find_school_by_code(&code))?;
    Ok(json!({ "school": to_json(&school)? }))
}

fn users_create(conn: &Connection, params: &Value) -> Result<Value, PortalError> {
    let school_id = get_required_str(params, "schoolId")?;
    let name = get_required_str(params, "name")?;
    let email = get_required_str(params, "email")?.to_ascii_lowercase();
    if !email.contains('@') {
        return Err(PortalError::rejected("bad_params", "email must contain @"));
    }
    let role_raw = get_required_str(params, "role")?;
    let role = Role::parse(&role_raw).ok_or_else(|| {
        PortalError::rejected(
            "bad_params",
            "role must be one of: principal, teacher, parent, admin",
        )
    })?;
    let store = SqliteStore::new(conn);
    store.get_school(&school_id)?;
    let user = store.insert_user(&NewUser {
        school_id,
        name,
        email,
        role,
    })?;
    info!(user_id = %user.id, role = user.role.as_str(), "user created");
    Ok(json!({ "user": to_json(&user)? }))
}

fn users_list(conn: &Connection, params: &Value) -> Result<Value, PortalError> {
    let school_id = get_required_str(params, "schoolId")?;
    let users = SqliteStore::new(conn).list_users(&school_id)?;
    Ok(json!({ "users": to_json(&users)? }))
}

fn students_create(conn: &Connection, params: &Value) -> Result<Value, PortalError> {
    let school_id = get_required_str(params, "schoolId")?;
    let name = get_required_str(params, "name")?;
    let class_name = get_required_str(params, "className")?;
    let roll_number = params
        .get("rollNumber")
        .and_then(|v| v.as_i64())
        .filter(|n| *n > 0)
        .ok_or_else(|| PortalError::rejected("bad_params", "rollNumber must be a positive integer"))?;
    let store = SqliteStore::new(conn);
    store.get_school(&school_id)?;
    let parent_user_id = get_opt_str(params, "parentUserId");
    if let Some(parent) = parent_user_id.as_deref() {
        let user = store.get_user(parent)?;
        if user.role != Role::Parent {
            return Err(PortalError::rejected(
                "bad_params",
                "parentUserId must refer to a parent account",
            ));
        }
    }
    let student = store.insert_student(&NewStudent {
        school_id,
        name,
        class_name,
        roll_number,
        parent_user_id,
    })?;
    info!(student_id = %student.id, class = %student.class_name, "student created");
    Ok(json!({ "student": to_json(&student)? }))
}

fn students_list(conn: &Connection, params: &Value) -> Result<Value, PortalError> {
    let school_id = get_required_str(params, "schoolId")?;
    let class_name = get_opt_str(params, "className");
    let students = SqliteStore::new(conn).list_students(&school_id, class_name.as_deref())?;
    Ok(json!({ "students": to_json(&students)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "schools.create" => Some(with_conn(state, req, schools_create)),
        "schools.lookup" => Some(with_conn(state, req, schools_lookup)),
        "users.create" => Some(with_conn(state, req, users_create)),
        "users.list" => Some(with_conn(state, req, users_list)),
        "students.create" => Some(with_conn(state, req, students_create)),
        "students.list" => Some(with_conn(state, req, students_list)),
        _ => None,
    }
}

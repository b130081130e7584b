use std::collections::BTreeSet;

use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::authz::{Principal, Role};
use crate::errors::{AppError, AppResult};
use crate::models::user::{DbUser, User, USER_COLUMNS};
use crate::utils::parse_uuid;

pub async fn fetch_db_user(pool: &SqlitePool, user_id: Uuid) -> AppResult<Option<DbUser>> {
    let user = sqlx::query_as::<_, DbUser>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
        .bind(user_id.to_string())
        .fetch_optional(pool)
        .await?;
    Ok(user)
}

pub async fn fetch_db_user_by_username(pool: &SqlitePool, username: &str) -> AppResult<Option<DbUser>> {
    let user = sqlx::query_as::<_, DbUser>(&format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?"))
        .bind(username)
        .fetch_optional(pool)
        .await?;
    Ok(user)
}

pub async fn groups(conn: &mut SqliteConnection, user_id: Uuid) -> AppResult<Vec<Role>> {
    let names: Vec<String> =
        sqlx::query_scalar("SELECT group_name FROM user_groups WHERE user_id = ? ORDER BY group_name")
            .bind(user_id.to_string())
            .fetch_all(&mut *conn)
            .await?;
    Ok(names.iter().filter_map(|name| Role::from_group_name(name)).collect())
}

pub async fn departments(conn: &mut SqliteConnection, user_id: Uuid) -> AppResult<Vec<Uuid>> {
    let ids: Vec<String> = sqlx::query_scalar(
        "SELECT department_id FROM user_departments WHERE user_id = ? ORDER BY department_id",
    )
    .bind(user_id.to_string())
    .fetch_all(&mut *conn)
    .await?;
    ids.iter().map(|id| parse_uuid(id)).collect()
}

/// Loads a user with their role groups and departments.
pub async fn load_user(conn: &mut SqliteConnection, db_user: DbUser) -> AppResult<User> {
    let user_id = parse_uuid(&db_user.id)?;
    let groups = groups(conn, user_id).await?;
    let departments = departments(conn, user_id).await?;
    User::from_db(db_user, groups, departments)
}

pub async fn fetch_user(pool: &SqlitePool, user_id: Uuid) -> AppResult<User> {
    let db_user = fetch_db_user(pool, user_id)
        .await?
        .ok_or_else(|| AppError::not_found("user not found"))?;
    let mut conn = pool.acquire().await?;
    load_user(&mut conn, db_user).await
}

pub fn principal_of(user: &User) -> Principal {
    let principal = Principal::new(user.id, user.username.clone())
        .with_groups(user.groups.iter().copied())
        .with_departments(user.department_ids.iter().copied());
    if user.is_superuser {
        principal.superuser()
    } else {
        principal
    }
}

/// Loads an active principal. Missing and deactivated users both yield `None`.
pub async fn load_principal(pool: &SqlitePool, user_id: Uuid) -> AppResult<Option<Principal>> {
    let Some(db_user) = fetch_db_user(pool, user_id).await? else {
        return Ok(None);
    };
    if !db_user.is_active {
        return Ok(None);
    }
    let mut conn = pool.acquire().await?;
    let user = load_user(&mut conn, db_user).await?;
    Ok(Some(principal_of(&user)))
}

pub async fn set_groups(conn: &mut SqliteConnection, user_id: Uuid, groups: &[Role]) -> AppResult<()> {
    sqlx::query("DELETE FROM user_groups WHERE user_id = ?")
        .bind(user_id.to_string())
        .execute(&mut *conn)
        .await?;

    let unique: BTreeSet<&'static str> = groups.iter().filter_map(|role| role.group_name()).collect();
    for name in unique {
        sqlx::query("INSERT INTO user_groups (user_id, group_name) VALUES (?, ?)")
            .bind(user_id.to_string())
            .bind(name)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

pub async fn add_group(conn: &mut SqliteConnection, user_id: Uuid, role: Role) -> AppResult<()> {
    let name = role
        .group_name()
        .ok_or_else(|| AppError::bad_field("groups", "None is not a role group"))?;
    sqlx::query("INSERT OR IGNORE INTO user_groups (user_id, group_name) VALUES (?, ?)")
        .bind(user_id.to_string())
        .bind(name)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn set_departments(
    conn: &mut SqliteConnection,
    user_id: Uuid,
    department_ids: &[Uuid],
) -> AppResult<()> {
    sqlx::query("DELETE FROM user_departments WHERE user_id = ?")
        .bind(user_id.to_string())
        .execute(&mut *conn)
        .await?;

    let unique: BTreeSet<Uuid> = department_ids.iter().copied().collect();
    for department_id in unique {
        add_department(conn, user_id, department_id).await?;
    }
    Ok(())
}

pub async fn add_department(conn: &mut SqliteConnection, user_id: Uuid, department_id: Uuid) -> AppResult<()> {
    sqlx::query("INSERT OR IGNORE INTO user_departments (user_id, department_id) VALUES (?, ?)")
        .bind(user_id.to_string())
        .bind(department_id.to_string())
        .execute(&mut *conn)
        .await
        .map_err(|err| match &err {
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                AppError::bad_field("department_ids", format!("department {department_id} does not exist"))
            }
            _ => AppError::Database(err),
        })?;
    Ok(())
}

/// Inserts a user row. The password must already be hashed.
#[allow(clippy::too_many_arguments)]
pub async fn insert_user(
    conn: &mut SqliteConnection,
    user_id: Uuid,
    username: &str,
    email: &str,
    first_name: &str,
    last_name: &str,
    password_hash: &str,
    is_superuser: bool,
) -> AppResult<()> {
    let now = crate::utils::utc_now();
    sqlx::query(
        "INSERT INTO users (id, username, email, first_name, last_name, password_hash, is_superuser, is_active, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?, ?)",
    )
    .bind(user_id.to_string())
    .bind(username)
    .bind(email)
    .bind(first_name)
    .bind(last_name)
    .bind(password_hash)
    .bind(is_superuser)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(|err| AppError::unique_violation(err, "username already in use"))?;
    Ok(())
}

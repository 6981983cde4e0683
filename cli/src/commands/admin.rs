//! Offline administration against the configured database file.

use anyhow::{bail, Context, Result};
use authz::Operation;
use colored::*;
use database::{initialize_database, make_record_acl, Database, DatabaseConfig};
use std::path::Path;
use user::database::UserDatabase;

/// Opens the records database and the identity tables living in the same
/// file, creating both if needed.
async fn open(config_path: Option<&Path>) -> Result<(Database, UserDatabase)> {
    let config = super::load_config(config_path)?;
    let db = initialize_database(DatabaseConfig::new_with_path(config.database.path.clone()))
        .await
        .with_context(|| format!("Failed to open database {}", config.database.path.display()))?;
    let users = UserDatabase::from_pool(db.get_pool()).await?;
    Ok((db, users))
}

pub async fn add_user(
    config_path: Option<&Path>,
    username: &str,
    password: &str,
    name: Option<&str>,
    roles: &[String],
) -> Result<()> {
    let (_db, users) = open(config_path).await?;

    // Check roles first so a typo does not leave a user without them.
    for role in roles {
        if users.find_role(role).await?.is_none() {
            bail!("role '{}' does not exist; create it with `keystone role add`", role);
        }
    }

    let user = users.create_user(username, password, name).await?;
    for role in roles {
        users.assign_role(user.id, role).await?;
    }

    println!(
        "{} user {} (id {}) with roles: {}",
        "Created".green().bold(),
        user.username,
        user.id,
        roles.join(", ")
    );
    Ok(())
}

pub async fn add_role(config_path: Option<&Path>, name: &str, description: Option<&str>) -> Result<()> {
    let (_db, users) = open(config_path).await?;

    if users.find_role(name).await?.is_some() {
        bail!("role '{}' already exists", name);
    }
    let role = users.create_role(name, description).await?;

    println!("{} role {} (id {})", "Created".green().bold(), role.name, role.id);
    Ok(())
}

pub async fn grant_acl(
    config_path: Option<&Path>,
    resource: &str,
    record_ids: &[i64],
    role_names: &[String],
    permissions: &[String],
) -> Result<()> {
    let (db, users) = open(config_path).await?;

    let permissions = permissions
        .iter()
        .map(|p| p.parse::<Operation>())
        .collect::<Result<Vec<_>, _>>()?;

    let mut role_ids = Vec::with_capacity(role_names.len());
    for name in role_names {
        // The anonymous role is a valid grantee here.
        let role = users
            .find_role(name)
            .await?
            .with_context(|| format!("role '{}' does not exist", name))?;
        role_ids.push(role.id);
    }

    let entries = make_record_acl(&[resource], record_ids, &role_ids, &permissions);
    db.grant_acl_all(&entries).await?;

    println!(
        "{} {} access-control entr{} on {}",
        "Granted".green().bold(),
        entries.len(),
        if entries.len() == 1 { "y" } else { "ies" },
        resource
    );
    Ok(())
}

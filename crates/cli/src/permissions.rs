//! Role, user and per-file permission commands.
//!
//! Every mutating command pulls first, applies the edit as the configured
//! user, commits the registry and pushes it.

use anyhow::{Context, Result};
use clap::Subcommand;
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};

use megsync_core::config::AppConfig;
use megsync_core::errors::PermissionError;
use megsync_core::permissions::{Capability, PermissionRegistry, Role};
use megsync_core::SyncController;

use crate::{repo_path, style, with_controller};

#[derive(Subcommand, Debug)]
pub enum RolesAction {
    /// List every role and its capabilities.
    List,
    /// Show one role, its members and per-file grants.
    Show { role: String },
    /// Create a role with no capabilities.
    Create { role: String },
    /// Delete a role and every reference to it.
    Delete { role: String },
}

#[derive(Subcommand, Debug)]
pub enum UsersAction {
    /// List users with explicit role assignments.
    List,
    /// Show the roles a user holds.
    Roles { user: String },
    /// Assign a role to a user.
    Grant { user: String, role: String },
    /// Take a role away from a user.
    Revoke { user: String, role: String },
}

// ---------------------------------------------------------------------------
// Read-only views
// ---------------------------------------------------------------------------

pub async fn cmd_roles(config: &AppConfig, action: RolesAction) -> Result<()> {
    match action {
        RolesAction::List => {
            with_controller(config, "roles", |c| {
                print_roles(c.registry());
                Ok(())
            })
            .await
        }
        RolesAction::Show { role } => {
            with_controller(config, "roles", move |c| show_role(c.registry(), &role)).await
        }
        RolesAction::Create { role } => {
            let message = format!("create role {role}");
            publish(config, message, move |reg, actor| {
                reg.create_role(actor, &role).map(|_| ())
            })
            .await
        }
        RolesAction::Delete { role } => {
            let message = format!("delete role {role}");
            publish(config, message, move |reg, actor| {
                reg.delete_role(actor, &role).map(|_| ())
            })
            .await
        }
    }
}

pub async fn cmd_users(config: &AppConfig, action: UsersAction) -> Result<()> {
    match action {
        UsersAction::List => {
            with_controller(config, "users", |c| {
                let registry = c.registry();
                let users = registry.get_users();
                if users.is_empty() {
                    println!("{}", style::dim("No users have explicit roles."));
                    return Ok(());
                }
                let mut table = Table::new();
                table.load_preset(UTF8_FULL);
                table.set_content_arrangement(ContentArrangement::Dynamic);
                table.set_header(vec!["User", "Roles"]);
                for user in users {
                    table.add_row(vec![
                        Cell::new(user),
                        Cell::new(registry.get_roles_for_user(user).join(", ")),
                    ]);
                }
                println!("{table}");
                Ok(())
            })
            .await
        }
        UsersAction::Roles { user } => {
            with_controller(config, "users", move |c| {
                let registry = c.registry();
                println!("{}", style::header(&format!("Roles of {user}")));
                for role in registry.get_roles_for_user(&user) {
                    println!("  {role}");
                }
                println!();
                println!("  may lock        : {}", yes_no(registry.can_lock(&user)));
                println!("  may remove locks: {}", yes_no(registry.can_remove_lock(&user)));
                println!("  administrator   : {}", yes_no(registry.can_administer(&user)));
                Ok(())
            })
            .await
        }
        UsersAction::Grant { user, role } => {
            let message = format!("grant {role} to {user}");
            publish(config, message, move |reg, actor| reg.grant_role(actor, &user, &role)).await
        }
        UsersAction::Revoke { user, role } => {
            let message = format!("revoke {role} from {user}");
            publish(config, message, move |reg, actor| reg.remove_role(actor, &user, &role)).await
        }
    }
}

// ---------------------------------------------------------------------------
// Capability and per-file edits
// ---------------------------------------------------------------------------

pub async fn cmd_capability(
    config: &AppConfig,
    role: String,
    capability: String,
    path: Option<String>,
    granted: bool,
) -> Result<()> {
    let path = path.as_deref().map(repo_path);
    let verb = if granted { "allow" } else { "deny" };
    let message = match &path {
        Some(p) => format!("{verb} {capability} on {p} for {role}"),
        None => format!("{verb} {capability} for {role}"),
    };
    publish(config, message, move |reg, actor| {
        let path = path.as_deref();
        if granted {
            reg.add_role_permission(actor, &role, &capability, path)
        } else {
            reg.remove_role_permission(actor, &role, &capability, path)
        }
    })
    .await
}

pub async fn cmd_readonly(config: &AppConfig, path: String, readonly: bool) -> Result<()> {
    let path = repo_path(&path);
    let message = if readonly {
        format!("mark {path} read-only")
    } else {
        format!("mark {path} writable")
    };
    publish(config, message, move |reg, actor| {
        reg.set_file_readonly(actor, &path, readonly)
    })
    .await
}

pub async fn cmd_file_write(
    config: &AppConfig,
    user: String,
    path: String,
    granted: bool,
) -> Result<()> {
    let path = repo_path(&path);
    let message = if granted {
        format!("grant {user} write access to {path}")
    } else {
        format!("revoke {user} write access to {path}")
    };
    publish(config, message, move |reg, actor| {
        if granted {
            reg.grant_user_file_write(actor, &user, &path)
        } else {
            reg.revoke_user_file_write(actor, &user, &path)
        }
    })
    .await
}

/// Pull, apply `edit`, commit the registry and push it.
async fn publish<F>(config: &AppConfig, message: String, edit: F) -> Result<()>
where
    F: FnOnce(&mut PermissionRegistry, &str) -> Result<(), PermissionError> + Send + 'static,
{
    with_controller(config, "permission change", move |c: &mut SyncController| {
        c.pull().context("failed to pull before changing permissions")?;
        c.edit_permissions(&message, edit)?;
        c.push().context("permission change committed locally but push failed")?;
        println!("{}", style::success(&message));
        Ok(())
    })
    .await
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn print_roles(registry: &PermissionRegistry) {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    let mut header = vec!["Role"];
    header.extend(Capability::ALL.iter().map(|c| c.name()));
    table.set_header(header);

    for role in registry.get_roles() {
        let mut row = vec![Cell::new(&role.name)];
        row.extend(Capability::ALL.iter().map(|c| Cell::new(mark(role, *c))));
        table.add_row(row);
    }
    println!("{table}");
}

fn show_role(registry: &PermissionRegistry, name: &str) -> Result<()> {
    let role = registry
        .role(name)
        .ok_or_else(|| anyhow::anyhow!("role '{}' not found", name))?;

    println!("{}", style::header(&format!("Role: {name}")));
    println!();
    for cap in Capability::ALL {
        println!("  {:<22}: {}", cap.name(), yes_no(role.has(cap)));
    }

    let members: Vec<&str> = registry
        .get_users()
        .into_iter()
        .filter(|u| registry.get_roles_for_user(u).iter().any(|r| r == name))
        .collect();
    println!();
    if members.is_empty() {
        println!("  members: {}", style::dim("none"));
    } else {
        println!("  members: {}", members.join(", "));
    }

    let paths: Vec<&str> = registry
        .file_overrides()
        .filter(|(_, o)| o.granted_roles.contains(name))
        .map(|(path, _)| path)
        .collect();
    if !paths.is_empty() {
        println!("  may write:");
        for path in paths {
            println!("    {path}");
        }
    }
    Ok(())
}

fn mark(role: &Role, capability: Capability) -> &'static str {
    if role.has(capability) {
        "✓"
    } else {
        ""
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

//! `ward`: administer a Ward object store from the command line.
//!
//! Reads `ward.toml` (or the path given with `--config`) and `WARD_*`
//! environment variables, opens the SQLite store and runs one subcommand.
//!
//! ```text
//! ward role add analysts
//! ward user add-role alice analysts
//! ward create alert --owner alice --data '{"status":"open"}'
//! ward query alert -f 'status=open' -f 'tag={1,2}' --as-user alice
//! ```

mod config;

use std::path::PathBuf;

use anyhow::{Context as _, anyhow};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use ward_core::{
  audit::AuditContext,
  filter::compile,
  permission::{PermissionKind, RoleId},
  record::NewRecord,
  search::BaseSchema,
  store::{ObjectQuery, ObjectStore, PermissionRegistry, Sort},
  target::{TargetRef, TargetType},
};
use ward_store_sqlite::SqliteStore;

use crate::config::WardConfig;

// ─── CLI args ────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "ward", author, version, about = "Ward object store administration")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "ward.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Create the database and schema if missing.
  Init,

  #[command(subcommand)]
  Role(RoleCommand),

  #[command(subcommand)]
  User(UserCommand),

  /// Grant a permission on an object (`type:id`) to a role.
  Grant {
    role:   String,
    target: TargetRef,
    perm:   PermissionKind,
  },

  /// Revoke a permission on an object from a role.
  Revoke {
    role:   String,
    target: TargetRef,
    perm:   PermissionKind,
  },

  /// Show which roles hold which permissions on an object.
  Perms { target: TargetRef },

  /// Create an object owned by `--owner`, applying the owner policy, or
  /// inheriting from `--parent`.
  Create {
    target_type: TargetType,
    #[arg(long)]
    owner:       String,
    /// JSON object with the type-specific fields.
    #[arg(long)]
    data:        Option<String>,
    #[arg(long)]
    parent:      Option<TargetRef>,
  },

  /// Filtered, paginated listing.
  Query {
    target_type: TargetType,
    /// `field=value` using the filter grammar; repeatable.
    #[arg(short, long = "filter")]
    filters:     Vec<String>,
    /// `field` or `-field`.
    #[arg(long, default_value = "-id")]
    sort:        String,
    #[arg(long, default_value_t = 0)]
    skip:        usize,
    #[arg(long)]
    limit:       Option<usize>,
    /// Scope results to what this user may read.
    #[arg(long)]
    as_user:     Option<String>,
  },

  /// Audit trail of an object.
  History { target: TargetRef },

  /// Soft-delete an object.
  Remove {
    target: TargetRef,
    #[arg(long)]
    user:   String,
  },

  /// Restore a soft-deleted object.
  Undelete {
    target: TargetRef,
    /// Restore as this user; omit to restore as an admin.
    #[arg(long)]
    user:   Option<String>,
    /// Restore under a fresh id.
    #[arg(long)]
    new_id: bool,
  },
}

#[derive(Subcommand)]
enum RoleCommand {
  Add {
    name:        String,
    #[arg(long)]
    description: Option<String>,
  },
  List,
  /// Make every holder of the role a global admin.
  MakeAdmin { name: String },
}

#[derive(Subcommand)]
enum UserCommand {
  AddRole { username: String, role: String },
  Roles { username: String },
}

// ─── Entry point ─────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .with_writer(std::io::stderr)
    .init();

  let cli = Cli::parse();
  let cfg = WardConfig::load(&cli.config)?;

  if let Some(dir) = cfg.store_path.parent()
    && !dir.as_os_str().is_empty()
  {
    std::fs::create_dir_all(dir)
      .with_context(|| format!("failed to create {}", dir.display()))?;
  }
  let store = SqliteStore::open(&cfg.store_path)
    .await
    .with_context(|| format!("failed to open store at {:?}", cfg.store_path))?
    .with_default_permissions(cfg.default_permissions.clone());

  run(&store, cli.command).await
}

async fn run(store: &SqliteStore, command: Command) -> anyhow::Result<()> {
  match command {
    Command::Init => {
      tracing::info!("store ready");
    }

    Command::Role(RoleCommand::Add { name, description }) => {
      print_json(&store.create_role(&name, description.as_deref()).await?)?;
    }
    Command::Role(RoleCommand::List) => print_json(&store.list_roles().await?)?,
    Command::Role(RoleCommand::MakeAdmin { name }) => {
      let role = role_id(store, &name).await?;
      print_json(&store.grant_admin(role).await?)?;
    }

    Command::User(UserCommand::AddRole { username, role }) => {
      let role = role_id(store, &role).await?;
      store.assign_role(&username, role).await?;
    }
    Command::User(UserCommand::Roles { username }) => {
      print_json(&store.roles_for_user(&username).await?)?;
    }

    Command::Grant { role, target, perm } => {
      let role = role_id(store, &role).await?;
      print_json(&store.grant(role, target, perm).await?)?;
    }
    Command::Revoke { role, target, perm } => {
      let role = role_id(store, &role).await?;
      match store.revoke(role, target, perm).await? {
        Some(removed) => print_json(&removed)?,
        None => println!("nothing to revoke"),
      }
    }
    Command::Perms { target } => print_json(&store.get_permission_roles(target).await?)?,

    Command::Create { target_type, owner, data, parent } => {
      let mut input = NewRecord::new(target_type, owner.clone());
      if let Some(raw) = data {
        input = input.with_data(serde_json::from_str(&raw).context("--data is not valid JSON")?);
      }
      let audit = AuditContext::new(owner);
      let record = match parent {
        Some(parent) => store.create_in_object(input, parent, Some(&audit)).await?,
        None => store.create_with_owner(input, Some(&audit)).await?,
      };
      print_json(&record)?;
    }

    Command::Query { target_type, filters, sort, skip, limit, as_user } => {
      let pairs = filters
        .iter()
        .map(|f| {
          f.split_once('=')
            .ok_or_else(|| anyhow!("filter {f:?} is not of the form field=value"))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

      let roles: Option<Vec<RoleId>> = match as_user {
        Some(user) => store.scope_for_user(&user).await?,
        None => None,
      };
      let mut query = ObjectQuery::new(target_type, roles);
      query.filter = compile(&BaseSchema::for_type(target_type), pairs)?;
      query.sort = Sort::parse(&sort);
      query.skip = skip;
      query.limit = limit;
      print_json(&store.query_with_filters(&query).await?)?;
    }

    Command::History { target } => print_json(&store.get_history(target).await?)?,

    Command::Remove { target, user } => {
      let audit = AuditContext::new(user.clone());
      match store.remove(target, &user, Some(&audit)).await? {
        Some(record) => print_json(&record)?,
        None => println!("nothing to remove"),
      }
    }

    Command::Undelete { target, user, new_id } => {
      let audit = AuditContext::new(user.clone().unwrap_or_else(|| "admin".to_owned()));
      let record = store
        .undelete(target, !new_id, user.as_deref(), Some(&audit))
        .await?;
      print_json(&record)?;
    }
  }
  Ok(())
}

async fn role_id(store: &SqliteStore, name: &str) -> anyhow::Result<RoleId> {
  store
    .get_role_by_name(name)
    .await?
    .map(|r| r.id)
    .ok_or_else(|| anyhow!("no role named {name:?}"))
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

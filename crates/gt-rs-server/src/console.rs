//! Operator console commands.

use std::time::Duration;

use gt_rs_store::{World, WorldOptions};
use gt_rs_world::{LockToken, WorldError};

use crate::realm::Realm;

/// Result of one console line.
#[derive(Debug, Default)]
pub struct ConsoleReply {
    pub success: bool,
    pub messages: Vec<String>,
    /// The operator asked the server to stop.
    pub should_stop: bool,
    /// A world was created and needs a growth task.
    pub created_world: Option<u64>,
}

impl ConsoleReply {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            messages: vec![message.into()],
            ..Self::default()
        }
    }

    fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            messages: vec![message.into()],
            ..Self::default()
        }
    }

    fn lines(messages: Vec<String>) -> Self {
        Self {
            success: true,
            messages,
            ..Self::default()
        }
    }
}

const HELP: &[(&str, &str)] = &[
    ("help", "List console commands"),
    ("list", "List worlds"),
    ("info <world>", "Show one world"),
    ("create <name> [owner] [w h]", "Create a world"),
    ("lock <world> <holder> <secs>", "Put a world in exclusive mode"),
    ("unlock <world> <token>", "Leave exclusive mode"),
    ("sweep", "Drop expired locks and sessions now"),
    ("stop", "Stop the server"),
];

pub fn execute(realm: &Realm, line: &str) -> ConsoleReply {
    let mut parts = line.split_whitespace();
    let Some(command) = parts.next() else {
        return ConsoleReply::default();
    };
    let args: Vec<&str> = parts.collect();

    match command.to_ascii_lowercase().as_str() {
        "help" => ConsoleReply::lines(
            HELP.iter()
                .map(|(usage, about)| format!("{usage} - {about}"))
                .collect(),
        ),
        "list" => cmd_list(realm),
        "info" => match args.as_slice() {
            [name] => cmd_info(realm, name),
            _ => ConsoleReply::err("Usage: info <world>"),
        },
        "create" => cmd_create(realm, &args),
        "lock" => match args.as_slice() {
            [name, holder, secs] => match secs.parse::<u64>() {
                Ok(secs) => cmd_lock(realm, name, holder, Duration::from_secs(secs)),
                Err(_) => ConsoleReply::err(format!("Invalid duration: {secs}")),
            },
            _ => ConsoleReply::err("Usage: lock <world> <holder> <secs>"),
        },
        "unlock" => match args.as_slice() {
            [name, token] => cmd_unlock(realm, name, token),
            _ => ConsoleReply::err("Usage: unlock <world> <token>"),
        },
        "sweep" => cmd_sweep(realm),
        "stop" => ConsoleReply {
            should_stop: true,
            ..ConsoleReply::ok("Stopping the server...")
        },
        other => ConsoleReply::err(format!(
            "Unknown command: {other}. Type help for a list of commands."
        )),
    }
}

fn describe(world: &World) -> String {
    format!(
        "{} (id {}): {}x{}, {} player(s){}",
        world.name,
        world.id,
        world.width,
        world.height,
        world.player_count,
        if world.locked() { ", locked" } else { "" }
    )
}

fn cmd_list(realm: &Realm) -> ConsoleReply {
    let worlds = realm.registry.list_worlds();
    if worlds.is_empty() {
        return ConsoleReply::ok("No worlds.");
    }
    let mut messages = vec![format!("{} world(s):", worlds.len())];
    messages.extend(worlds.iter().map(|w| format!("  {}", describe(w))));
    ConsoleReply::lines(messages)
}

fn cmd_info(realm: &Realm, name: &str) -> ConsoleReply {
    let world = match realm.registry.find_by_name(name) {
        Ok(w) => w,
        Err(e) => return ConsoleReply::err(e.to_string()),
    };
    let blocks = realm.grid.blocks_in(world.id).map(|b| b.len()).unwrap_or(0);
    let trees = realm.grid.trees_in(world.id).unwrap_or_default();
    let ripe = trees.iter().filter(|t| t.harvestable()).count();

    let mut messages = vec![describe(&world)];
    messages.push(format!(
        "  owner: {}",
        world.owner.as_deref().unwrap_or("(none)")
    ));
    if let Some(description) = &world.description {
        messages.push(format!("  description: {description}"));
    }
    messages.push(format!(
        "  {blocks} block(s), {} tree(s), {ripe} ready to harvest",
        trees.len()
    ));
    if let Some(token) = world.lock_id() {
        messages.push(format!("  lock token: {token}"));
    }
    ConsoleReply::lines(messages)
}

fn cmd_create(realm: &Realm, args: &[&str]) -> ConsoleReply {
    let parse_dims =
        |w: &str, h: &str| -> Option<(u32, u32)> { Some((w.parse().ok()?, h.parse().ok()?)) };
    let (name, owner, dims) = match args {
        [name] => (*name, None, None),
        [name, owner] => (*name, Some(*owner), None),
        [name, w, h] => match parse_dims(*w, *h) {
            Some(dims) => (*name, None, Some(dims)),
            None => return ConsoleReply::err("Invalid world size"),
        },
        [name, owner, w, h] => match parse_dims(*w, *h) {
            Some(dims) => (*name, Some(*owner), Some(dims)),
            None => return ConsoleReply::err("Invalid world size"),
        },
        _ => return ConsoleReply::err("Usage: create <name> [owner] [w h]"),
    };

    let mut options = WorldOptions::default();
    if let Some((width, height)) = dims {
        options.width = width;
        options.height = height;
    }
    match realm.registry.create_world(name, owner, options) {
        Ok(world) => ConsoleReply {
            created_world: Some(world.id),
            ..ConsoleReply::ok(format!("Created {}", describe(&world)))
        },
        Err(e) => ConsoleReply::err(e.to_string()),
    }
}

fn cmd_lock(realm: &Realm, name: &str, holder: &str, ttl: Duration) -> ConsoleReply {
    let result = realm
        .registry
        .find_by_name(name)
        .and_then(|world| realm.registry.lock_world(world.id, holder, ttl));
    match result {
        Ok(grant) => ConsoleReply::ok(format!(
            "Locked {name} for {holder} ({}s), token {}",
            ttl.as_secs(),
            grant.token
        )),
        Err(e) => ConsoleReply::err(e.to_string()),
    }
}

fn cmd_unlock(realm: &Realm, name: &str, token: &str) -> ConsoleReply {
    let result: Result<(), WorldError> = realm
        .registry
        .find_by_name(name)
        .and_then(|world| realm.registry.unlock_world(world.id, &LockToken::from(token)));
    match result {
        Ok(()) => ConsoleReply::ok(format!("Unlocked {name}")),
        Err(e) => ConsoleReply::err(e.to_string()),
    }
}

fn cmd_sweep(realm: &Realm) -> ConsoleReply {
    let locks = realm.grid.sweep_expired_locks();
    let sessions = realm.sessions.sweep_expired();
    ConsoleReply::ok(format!(
        "Swept {} lock(s) ({} block(s), {} world(s) cleared) and {sessions} session(s)",
        locks.locks, locks.blocks_cleared, locks.worlds_cleared
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use gt_rs_store::{ManualClock, MemoryStore, RecordStore};
    use std::sync::Arc;

    fn realm() -> (Arc<ManualClock>, Realm) {
        let store: Arc<dyn RecordStore> = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(0));
        let realm = Realm::with_store(store, clock.clone(), &ServerConfig::default()).unwrap();
        (clock, realm)
    }

    #[test]
    fn help_and_unknown() {
        let (_clock, realm) = realm();
        let reply = execute(&realm, "help");
        assert!(reply.success);
        assert_eq!(reply.messages.len(), HELP.len());

        let reply = execute(&realm, "teleport");
        assert!(!reply.success);
        assert!(reply.messages[0].contains("Unknown command"));

        let reply = execute(&realm, "   ");
        assert!(reply.messages.is_empty());
    }

    #[test]
    fn create_list_info() {
        let (_clock, realm) = realm();
        let reply = execute(&realm, "create garden alice 20 10");
        assert!(reply.success, "{:?}", reply.messages);
        let id = reply.created_world.unwrap();
        let world = realm.registry.get_world(id).unwrap();
        assert_eq!((world.width, world.height), (20, 10));
        assert_eq!(world.owner.as_deref(), Some("alice"));

        assert!(execute(&realm, "create beach").success);
        assert!(execute(&realm, "create dunes 5 5").success);
        assert!(!execute(&realm, "create garden").success);
        assert!(!execute(&realm, "create bad x y").success);

        let reply = execute(&realm, "list");
        assert_eq!(reply.messages.len(), 4);
        assert!(reply.messages[1].contains("GARDEN"));

        let reply = execute(&realm, "info Garden");
        assert!(reply.success);
        assert!(reply.messages[1].contains("alice"));
        assert!(!execute(&realm, "info nowhere").success);
    }

    #[test]
    fn lock_unlock_cycle() {
        let (_clock, realm) = realm();
        execute(&realm, "create garden");
        let reply = execute(&realm, "lock garden admin 60");
        assert!(reply.success, "{:?}", reply.messages);
        let token = realm
            .registry
            .find_by_name("garden")
            .unwrap()
            .lock_id()
            .unwrap()
            .to_string();
        assert!(reply.messages[0].contains(&token));

        assert!(!execute(&realm, "lock garden other 60").success);
        assert!(!execute(&realm, "unlock garden wrong").success);
        assert!(execute(&realm, &format!("unlock garden {token}")).success);
        assert!(!realm.registry.find_by_name("garden").unwrap().locked());
        assert!(!execute(&realm, "lock garden admin soon").success);
    }

    #[test]
    fn sweep_reports_expired() {
        let (clock, realm) = realm();
        execute(&realm, "create garden");
        execute(&realm, "lock garden admin 1");
        clock.advance(Duration::from_secs(2));
        let reply = execute(&realm, "sweep");
        assert!(reply.messages[0].contains("1 world(s) cleared"));
    }

    #[test]
    fn stop_requests_shutdown() {
        let (_clock, realm) = realm();
        let reply = execute(&realm, "STOP");
        assert!(reply.should_stop);
        assert!(reply.success);
    }
}

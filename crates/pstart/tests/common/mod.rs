//! In-memory `lxc` used by the integration tests.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::io;
use std::rc::Rc;

use pstart::lxc::LxcClient;
use pstart::runner::{Executor, RunResult, Runner, Stdin};

/// A file pushed into an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushedFile {
    pub data: Vec<u8>,
    pub mode: String,
    pub uid: String,
    pub gid: String,
}

/// One simulated instance.
#[derive(Debug, Clone, Default)]
pub struct Instance {
    pub running: bool,
    pub profiles: Vec<String>,
    pub files: BTreeMap<String, PushedFile>,
}

/// Stateful stand-in for the subset of `lxc` pstart drives.
///
/// Keys are the strings pstart passes on the command line, so networks and
/// profiles are stored under their remote-scoped names.
#[derive(Debug, Default)]
pub struct FakeLxc {
    pub networks: RefCell<BTreeMap<String, String>>,
    pub profiles: RefCell<BTreeMap<String, String>>,
    pub instances: RefCell<BTreeMap<String, Instance>>,
    /// Every invocation, without the binary name.
    pub log: RefCell<Vec<String>>,
    /// Invocations starting with this prefix exit 1.
    pub fail_prefix: RefCell<Option<String>>,
    /// Exit code of user commands run through `exec`.
    pub command_exit: RefCell<i32>,
}

fn ok(stdout: impl Into<Vec<u8>>) -> RunResult {
    RunResult {
        stdout: stdout.into(),
        ..RunResult::default()
    }
}

fn fail(code: i32, message: &str) -> RunResult {
    RunResult {
        stderr: format!("Error: {message}\n").into_bytes(),
        exit_code: code,
        ..RunResult::default()
    }
}

fn remote_of(container: &str) -> String {
    container
        .split_once(':')
        .map(|(remote, _)| format!("{remote}:"))
        .unwrap_or_default()
}

fn flag<'a>(arg: &'a str, name: &str) -> &'a str {
    arg.strip_prefix(name).unwrap_or(arg)
}

impl FakeLxc {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Add a stopped instance with only the `default` profile.
    pub fn add_instance(&self, name: &str) {
        self.instances.borrow_mut().insert(
            name.to_string(),
            Instance {
                profiles: vec!["default".to_string()],
                ..Instance::default()
            },
        );
    }

    pub fn instance(&self, name: &str) -> Instance {
        self.instances.borrow()[name].clone()
    }

    pub fn fail_on(&self, prefix: &str) {
        *self.fail_prefix.borrow_mut() = Some(prefix.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.log.borrow().clone()
    }

    /// Whether some invocation starts with `prefix`.
    pub fn called(&self, prefix: &str) -> bool {
        self.log.borrow().iter().any(|c| c.starts_with(prefix))
    }

    fn with_instance(&self, name: &str, f: impl FnOnce(&mut Instance) -> RunResult) -> RunResult {
        match self.instances.borrow_mut().get_mut(name) {
            Some(instance) => f(instance),
            None => fail(1, "Instance not found"),
        }
    }

    fn show(map: &RefCell<BTreeMap<String, String>>, name: &str, what: &str) -> RunResult {
        map.borrow()
            .get(name)
            .map_or_else(|| fail(1, &format!("{what} not found")), |doc| ok(doc.clone()))
    }

    fn dispatch(&self, args: &[&str], stdin: &Stdin) -> RunResult {
        match args {
            ["info", c] => self.with_instance(c, |i| {
                let status = if i.running { "RUNNING" } else { "STOPPED" };
                ok(format!("Name: {c}\nStatus: {status}\nType: container\n"))
            }),
            ["config", "show", c] => self.with_instance(c, |i| {
                let mut doc = String::from("architecture: x86_64\nconfig: {}\nprofiles:\n");
                for profile in &i.profiles {
                    let _ = writeln!(doc, "- {profile}");
                }
                ok(doc)
            }),
            ["network", "show", n] => Self::show(&self.networks, n, "Network"),
            ["network", "create", n, address, nat, ..] => {
                if self.networks.borrow().contains_key(*n) {
                    return fail(1, "The network already exists");
                }
                self.networks.borrow_mut().insert(
                    (*n).to_string(),
                    format!(
                        "config:\n  ipv4.address: {}\n  ipv4.nat: \"{}\"\n  ipv6.address: none\ndescription: \"\"\nname: {n}\ntype: bridge\n",
                        flag(address, "ipv4.address="),
                        flag(nat, "ipv4.nat="),
                    ),
                );
                ok("")
            }
            ["profile", "show", p] => Self::show(&self.profiles, p, "Profile"),
            ["profile", "create", p] => {
                if self.profiles.borrow().contains_key(*p) {
                    return fail(1, "The profile already exists");
                }
                self.profiles
                    .borrow_mut()
                    .insert((*p).to_string(), "config: {}\ndescription: \"\"\ndevices: {}\n".to_string());
                ok("")
            }
            ["profile", "edit", p] => {
                let Stdin::Data(body) = stdin else {
                    return fail(1, "no profile body");
                };
                if !self.profiles.borrow().contains_key(*p) {
                    return fail(1, "Profile not found");
                }
                self.profiles
                    .borrow_mut()
                    .insert((*p).to_string(), String::from_utf8_lossy(body).into_owned());
                ok("")
            }
            ["profile", "add", c, p] => {
                if !self.profiles.borrow().contains_key(&format!("{}{p}", remote_of(c))) {
                    return fail(1, "Profile not found");
                }
                self.with_instance(c, |i| {
                    if i.profiles.iter().any(|x| x == p) {
                        return fail(1, "Profile already applied");
                    }
                    i.profiles.push((*p).to_string());
                    ok("")
                })
            }
            ["profile", "remove", c, p] => self.with_instance(c, |i| {
                let Some(pos) = i.profiles.iter().position(|x| x == p) else {
                    return fail(1, "Profile isn't currently applied");
                };
                i.profiles.remove(pos);
                ok("")
            }),
            ["file", "push", uid, gid, mode, "-", target] => {
                let Stdin::Data(data) = stdin else {
                    return fail(1, "no file data");
                };
                let Some(slash) = target.find('/') else {
                    return fail(1, "bad target");
                };
                let (c, path) = target.split_at(slash);
                let file = PushedFile {
                    data: data.clone(),
                    mode: flag(mode, "--mode=").to_string(),
                    uid: flag(uid, "--uid=").to_string(),
                    gid: flag(gid, "--gid=").to_string(),
                };
                self.with_instance(c, |i| {
                    i.files.insert(path.to_string(), file);
                    ok("")
                })
            }
            ["file", "pull", target, "-"] => {
                let Some(slash) = target.find('/') else {
                    return fail(1, "bad target");
                };
                let (c, path) = target.split_at(slash);
                self.with_instance(c, |i| match i.files.get(path) {
                    Some(file) => ok(file.data.clone()),
                    None => fail(1, "not found"),
                })
            }
            ["start", c] => self.with_instance(c, |i| {
                if i.running {
                    return fail(1, "The instance is already running");
                }
                i.running = true;
                ok("")
            }),
            ["stop", c] => self.with_instance(c, |i| {
                if !i.running {
                    return fail(1, "The instance is already stopped");
                }
                i.running = false;
                ok("")
            }),
            ["exec", c, "--", "/sbin/pstart-init", "wait"] => self.with_instance(c, |i| {
                if i.running && i.files.contains_key("/sbin/pstart-init") {
                    ok("")
                } else {
                    fail(1, "Instance is not running")
                }
            }),
            ["exec", c, "--", ..] => {
                let code = *self.command_exit.borrow();
                self.with_instance(c, |i| {
                    if !i.running {
                        return fail(1, "Instance is not running");
                    }
                    RunResult {
                        exit_code: code,
                        ..RunResult::default()
                    }
                })
            }
            other => fail(1, &format!("unsupported invocation {other:?}")),
        }
    }
}

impl Executor for FakeLxc {
    fn execute(&self, argv: &[String], stdin: &Stdin, _capture: bool) -> io::Result<RunResult> {
        let line = argv[1..].join(" ");
        self.log.borrow_mut().push(line.clone());

        if let Some(prefix) = self.fail_prefix.borrow().as_deref() {
            if line.starts_with(prefix) {
                return Ok(fail(1, "injected failure"));
            }
        }

        let args: Vec<&str> = argv[1..].iter().map(String::as_str).collect();
        Ok(self.dispatch(&args, stdin))
    }
}

/// Client backed by `fake`.
pub fn client(fake: &Rc<FakeLxc>) -> LxcClient {
    LxcClient::new(Runner::new(fake.clone()), "lxc")
}

/// A throwaway agent binary on disk.
pub fn agent_file(contents: &[u8]) -> tempfile::NamedTempFile {
    use std::io::Write;

    let mut file = tempfile::NamedTempFile::new().expect("temp agent");
    file.write_all(contents).expect("write agent");
    file
}

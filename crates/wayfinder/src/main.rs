use anyhow::{Context, Error};
use getopts::Options;
use std::collections::HashMap;
use std::env;
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread;
use wayfinder_core::catalog::{self, EntryCatalog, EntryKind, SortOrder};
use wayfinder_core::location::Location;
use wayfinder_core::logging::{init_logging, shutdown_logging};
use wayfinder_core::navigation::{breadcrumbs, Navigation};
use wayfinder_core::registry::{self, NameRegistry};
use wayfinder_core::settings::{Settings, SETTINGS_FILE};
use wayfinder_core::view::{FolderView, Tabs};
use wayfinder_core::watcher::{CatalogObserver, TargetId, WatchEvent};

const HELP: &str = "\
Commands:
  cd PATH          enter a directory (absolute, relative or ~)
  up | back | fwd  navigate
  hidden           toggle hidden files
  sort name|size [rev]
  info NAME        describe an entry
  tab [PATH]       open a new tab
  tabs             list tabs
  switch N         activate tab N
  close            close the active tab
  places           list places
  mount PATH NAME  register a mounted volume
  umount PATH      unregister a mounted volume
  quit";

enum Input {
    Line(String),
    Watch(WatchEvent),
    Eof,
}

#[derive(Default)]
struct Screen {
    active: Option<TargetId>,
    catalogs: HashMap<TargetId, Arc<EntryCatalog>>,
    order: SortOrder,
    reverse: bool,
}

impl Screen {
    fn print_active(&self, registry: &NameRegistry) {
        let Some(catalog) = self.active.and_then(|target| self.catalogs.get(&target)) else {
            return;
        };

        let path = breadcrumbs(catalog.target(), registry)
            .into_iter()
            .map(|crumb| crumb.label)
            .collect::<Vec<_>>()
            .join(" > ");
        println!("-- {} ({} entries)", path, catalog.len());

        for entry in catalog.arranged(self.order, self.reverse) {
            let marker = match entry.kind {
                EntryKind::Directory => "/",
                EntryKind::Symlink => "@",
                EntryKind::File | EntryKind::Other => "",
            };
            println!("  {}{}", registry.display_name(&entry.location), marker);
        }
    }
}

/// A screen borrowed together with the registry it resolves names through.
struct Render<'a> {
    screen: &'a mut Screen,
    registry: &'a NameRegistry,
}

impl CatalogObserver for Render<'_> {
    fn on_catalog_changed(&mut self, target: TargetId, catalog: &Arc<EntryCatalog>) {
        self.screen.catalogs.insert(target, Arc::clone(catalog));
        if self.screen.active == Some(target) {
            self.screen.print_active(self.registry);
        }
    }

    fn on_poll_error(&mut self, target: TargetId, error: &wayfinder_core::Error) {
        tracing::warn!(%target, %error, "poll failed");
        if self.screen.active == Some(target) {
            eprintln!("! {}", error);
        }
    }
}

fn forward_events(view: &FolderView, sink: Sender<Input>) {
    let events = view.events();
    thread::spawn(move || {
        for event in events {
            if sink.send(Input::Watch(event)).is_err() {
                break;
            }
        }
    });
}

fn open_tab(
    tabs: &mut Tabs,
    location: Location,
    registry: &NameRegistry,
    settings: &Settings,
    sink: &Sender<Input>,
) -> Result<TargetId, Error> {
    let view = FolderView::open(location, registry, settings)?;
    forward_events(&view, sink.clone());
    let target = view.target();
    tabs.open(view);
    Ok(target)
}

fn report(result: Result<Navigation, wayfinder_core::Error>) {
    match result {
        Ok(Navigation::Unavailable) => println!("(nothing there)"),
        Ok(_) => {}
        Err(err) => eprintln!("! {}", err),
    }
}

fn main() -> Result<(), Error> {
    let args: Vec<String> = env::args().skip(1).collect();

    let mut opts = Options::new();
    opts.optopt("c", "config", "Read settings from FILE.", "FILE");
    opts.optflag("a", "all", "Show hidden files.");
    opts.optopt("i", "interval", "Poll interval in milliseconds.", "MS");
    opts.optflag("h", "help", "Print this help message.");

    let matches = opts.parse(&args).context("failed to parse the command line arguments")?;

    if matches.opt_present("h") {
        println!("{}", opts.usage("Usage: wayfinder [-c FILE] [-a] [-i MS] [DIRECTORY]"));
        println!("{}", HELP);
        return Ok(());
    }

    let config = matches
        .opt_str("c")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(SETTINGS_FILE));
    let mut settings = Settings::load(&config)?;

    if matches.opt_present("a") {
        settings.watcher.show_hidden = true;
    }
    if let Some(interval) = matches.opt_str("i") {
        settings.watcher.poll_interval_ms = interval
            .parse()
            .with_context(|| format!("invalid poll interval {:?}", interval))?;
    }

    init_logging(&settings)?;

    let mut registry = NameRegistry::from_environment();
    let cwd = Location::new(env::current_dir().context("can't get current working directory")?)?;
    let start = match matches.free.first() {
        Some(input) => Location::resolve(input, &cwd, registry.home())?,
        None => registry.home().cloned().unwrap_or(cwd.clone()),
    };

    let (sink, inputs) = mpsc::channel();
    let mut tabs = Tabs::new();
    let first = open_tab(&mut tabs, start, &registry, &settings, &sink)?;

    let stdin_sink = sink.clone();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if stdin_sink.send(Input::Line(line)).is_err() {
                return;
            }
        }
        stdin_sink.send(Input::Eof).ok();
    });

    let mut screen = Screen {
        active: Some(first),
        ..Screen::default()
    };

    for input in inputs {
        let line = match input {
            Input::Watch(event) => {
                event.dispatch(&mut Render {
                    screen: &mut screen,
                    registry: &registry,
                });
                continue;
            }
            Input::Eof => break,
            Input::Line(line) => line,
        };

        let mut words = line.split_whitespace();
        let command = words.next().unwrap_or_default();
        let rest: Vec<&str> = words.collect();
        let base = tabs
            .active()
            .map(|view| view.location().clone())
            .unwrap_or_else(|| cwd.clone());

        match command {
            "" => {}
            "quit" | "exit" => break,
            "help" => println!("{}", HELP),
            "cd" => {
                let target = Location::resolve(&rest.join(" "), &base, registry.home());
                match (target, tabs.active_mut()) {
                    (Ok(target), Some(view)) => report(view.enter(target, &registry)),
                    (Err(err), _) => eprintln!("! {}", err),
                    (_, None) => eprintln!("! no open tab"),
                }
            }
            "up" | "back" | "fwd" => {
                if let Some(view) = tabs.active_mut() {
                    report(match command {
                        "up" => view.go_up(&registry),
                        "back" => view.go_back(&registry),
                        _ => view.go_forward(&registry),
                    });
                }
            }
            "hidden" => {
                if let Some(view) = tabs.active_mut() {
                    let show = !view.show_hidden();
                    view.set_show_hidden(show);
                }
            }
            "sort" => {
                screen.order = match rest.first() {
                    Some(&"size") => SortOrder::Size,
                    _ => SortOrder::Name,
                };
                screen.reverse = rest.get(1) == Some(&"rev");
                screen.print_active(&registry);
            }
            "info" => match base.child(&rest.join(" ")) {
                Ok(location) => {
                    let access = catalog::access(&location);
                    let summary = catalog::describe(&location).unwrap_or_else(|| "unreadable".to_string());
                    println!(
                        "{}: {} (read: {}, write: {})",
                        registry.display_name(&location),
                        summary,
                        access.readable,
                        access.writable
                    );
                }
                Err(err) => eprintln!("! {}", err),
            },
            "tab" => {
                let location = match rest.is_empty() {
                    true => Ok(base.clone()),
                    false => Location::resolve(&rest.join(" "), &base, registry.home()),
                };
                match location.map_err(Error::from).and_then(|location| {
                    open_tab(&mut tabs, location, &registry, &settings, &sink)
                }) {
                    Ok(target) => screen.active = Some(target),
                    Err(err) => eprintln!("! {:#}", err),
                }
            }
            "tabs" => {
                for (index, view) in tabs.iter().enumerate() {
                    let marker = if Some(index) == tabs.active_index() { "*" } else { " " };
                    println!("{} {} {}", marker, index, view.location());
                }
            }
            "switch" | "close" => {
                let ok = match command {
                    "switch" => rest
                        .first()
                        .and_then(|n| n.parse().ok())
                        .map_or(false, |index| tabs.select(index)),
                    _ => tabs
                        .active_index()
                        .and_then(|index| tabs.close(index))
                        .is_some(),
                };
                if !ok {
                    eprintln!("! no such tab");
                }
                screen.active = tabs.active().map(FolderView::target);
                screen.print_active(&registry);
            }
            "places" => {
                for place in registry.places() {
                    let space = registry::mount_space(&place.location)
                        .map(|space| format!("{} free", catalog::format_size(space.free)))
                        .unwrap_or_default();
                    println!("  {:<16} {} {}", place.name, place.location, space);
                }
            }
            "mount" => match (rest.first(), rest.get(1..)) {
                (Some(path), Some(name)) if !name.is_empty() => {
                    match Location::resolve(path, &base, registry.home()) {
                        Ok(location) => {
                            registry.add_mount(location, name.join(" "));
                        }
                        Err(err) => eprintln!("! {}", err),
                    }
                }
                _ => eprintln!("! usage: mount PATH NAME"),
            },
            "umount" => match rest.first().map(|path| Location::resolve(path, &base, registry.home())) {
                Some(Ok(location)) => {
                    if registry.remove_mount(&location).is_none() {
                        eprintln!("! {} is not a registered mount", location);
                    } else if let Some(Err(err)) = tabs.active().map(|view| view.reload(&registry)) {
                        eprintln!("! {}", err);
                    }
                }
                Some(Err(err)) => eprintln!("! {}", err),
                None => eprintln!("! usage: umount PATH"),
            },
            other => eprintln!("! unknown command {:?}, try help", other),
        }
    }

    drop(tabs);
    tracing::info!("exiting");
    shutdown_logging();

    Ok(())
}

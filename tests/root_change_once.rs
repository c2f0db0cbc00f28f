use minibox::{errors::SandboxSetupError, sandbox};
use std::path::Path;

// Changing the root cannot be undone, so this file holds a single test and
// gets a process of its own.
#[test]
fn root_changes_only_once() {
    if unsafe { libc::geteuid() } != 0 {
        eprintln!("skipping root_changes_only_once, needs root");
        return;
    }
    let new_root = tempfile::Builder::new()
        .prefix("minibox-root-change-")
        .tempdir()
        .unwrap()
        .keep();

    assert!(!sandbox::root_changed());
    assert!(matches!(
        sandbox::change_root(Path::new("/nonexistent/minibox-root")),
        Err(SandboxSetupError::RootChange { .. })
    ));
    assert!(!sandbox::root_changed());

    sandbox::change_root(&new_root).unwrap();
    assert!(sandbox::root_changed());
    assert!(matches!(
        sandbox::change_root(Path::new("/")),
        Err(SandboxSetupError::RootAlreadyChanged)
    ));
    assert!(matches!(
        sandbox::change_root(&new_root),
        Err(SandboxSetupError::RootAlreadyChanged)
    ));
}

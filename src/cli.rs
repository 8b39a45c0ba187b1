//! Command-line workflow gluing calibration, monitor mapping and profiles
//! together.

use anyhow::{Result, anyhow};
use log::{info, warn};
use pico_args::Arguments;
use std::{
    collections::HashMap,
    env,
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use crate::config::{self, AppConfig, Dirs};
use crate::events::{EventKind, TouchEvent};
use crate::ini::IniData;
use crate::monitors::{self, DesktopLayout, Monitor};
use crate::profile::Profile;
use crate::reader::TouchReader;
use crate::xinput;

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigint(_: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

#[derive(Debug, Default)]
struct Options {
    calibrate: bool,
    load_calibration: bool,
    list_devices: bool,
    list_monitors: bool,
    list_profiles: bool,
    status: bool,
    doctor: bool,
    udev_instructions: bool,
    reapply: bool,
    use_affine: bool,
    reset_mapping: bool,
    map_full_desktop: bool,
    run_event_loop: bool,
    include_related_tools: bool,
    margin_percent: f64,
    device_id: Option<i32>,
    device_path: Option<PathBuf>,
    monitor_index: Option<i32>,
    monitor_name: Option<String>,
    resolution: Option<(i32, i32)>,
    save_profile: Option<String>,
    load_profile: Option<String>,
    config_dir: Option<PathBuf>,
    calibration_dir: Option<PathBuf>,
    profile_dir: Option<PathBuf>,
    tool_filters: Vec<String>,
}

fn parse_options(mut pargs: Arguments) -> Result<Option<Options>> {
    if pargs.contains(["-h", "--help"]) {
        print_help();
        return Ok(None);
    }

    let mut options = Options {
        run_event_loop: true,
        include_related_tools: true,
        margin_percent: 0.5,
        ..Options::default()
    };

    options.calibrate = pargs.contains(["-c", "--calibrate"]);
    options.load_calibration = pargs.contains(["-l", "--load"]);
    options.list_devices = pargs.contains("--list-devices");
    options.list_monitors = pargs.contains("--list-monitors");
    options.list_profiles = pargs.contains("--list-profiles");
    if pargs.contains("--status") {
        options.status = true;
        options.run_event_loop = false;
    }
    options.doctor = pargs.contains("--doctor");
    options.udev_instructions =
        pargs.contains("--udev-install") || pargs.contains("--udev-rule");
    options.reapply = pargs.contains("--reapply");
    options.use_affine = pargs.contains("--affine");
    options.reset_mapping =
        pargs.contains("--reset-ctm") || pargs.contains("--reset-mapping");
    if pargs.contains("--no-loop") {
        options.run_event_loop = false;
    }
    if pargs.contains("--map-full") {
        options.map_full_desktop = true;
    }
    if pargs.contains("--no-related-tools") {
        options.include_related_tools = false;
    }

    if let Some(margin) = pargs.opt_value_from_str("--margin")? {
        options.margin_percent = margin;
    }
    options.device_id = pargs.opt_value_from_str("--device-id")?;
    options.device_path = pargs.opt_value_from_str(["-d", "--device"])?;
    options.monitor_index = pargs.opt_value_from_str(["-m", "--monitor"])?;
    options.monitor_name = pargs.opt_value_from_str("--monitor-name")?;
    options.save_profile = pargs.opt_value_from_str("--save-profile")?;
    options.load_profile = pargs.opt_value_from_str("--load-profile")?;
    options.config_dir = pargs.opt_value_from_str("--config-dir")?;
    options.calibration_dir = pargs.opt_value_from_str("--calibration-dir")?;
    options.profile_dir = pargs.opt_value_from_str("--profile-dir")?;
    options.resolution = pargs.opt_value_from_fn(["-r", "--resolution"], parse_resolution)?;
    if let Some(tools) = pargs.opt_value_from_str::<_, String>("--tool")? {
        options.tool_filters = tools
            .split(',')
            .map(|t| t.trim().to_ascii_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
    }

    let remaining = pargs.finish();
    if !remaining.is_empty() {
        return Err(anyhow!("unknown argument: {:?}", remaining[0]));
    }
    Ok(Some(options))
}

fn parse_resolution(value: &str) -> Result<(i32, i32), String> {
    let (w, h) = value
        .split_once('x')
        .ok_or_else(|| "expected WIDTHxHEIGHT".to_string())?;
    let w = w.trim().parse().map_err(|_| "invalid width".to_string())?;
    let h = h.trim().parse().map_err(|_| "invalid height".to_string())?;
    Ok((w, h))
}

pub fn run() -> Result<()> {
    let Some(options) = parse_options(Arguments::from_env())? else {
        return Ok(());
    };

    if options.udev_instructions {
        print_udev_instructions();
    }
    if options.doctor {
        print_doctor_report();
    }
    if (options.udev_instructions || options.doctor) && nothing_else_requested(&options) {
        return Ok(());
    }

    if env::var_os("WAYLAND_DISPLAY").is_some() && env::var_os("DISPLAY").is_none() {
        return Err(anyhow!(
            "Wayland session detected; xinput/xrandr mappings are X11-specific"
        ));
    }

    if options.list_devices {
        list_devices();
    }

    let layout = monitors::detect_layout()?;
    if options.list_monitors {
        list_monitors(&layout);
    }

    let dirs = Dirs::resolve(
        options.config_dir.clone(),
        options.calibration_dir.clone(),
        options.profile_dir.clone(),
    )?;

    if options.list_profiles {
        list_profiles(&dirs.profiles);
    }

    let requires_device = options.calibrate
        || options.load_calibration
        || options.load_profile.is_some()
        || options.save_profile.is_some()
        || options.status
        || options.reset_mapping
        || options.map_full_desktop
        || options.monitor_index.is_some()
        || options.monitor_name.is_some();
    let listing_only = !requires_device
        && (options.list_devices || options.list_monitors || options.list_profiles);
    let run_event_loop = options.run_event_loop && !listing_only;

    // resolve the target device
    let mut device_name = String::new();
    let mut device_path = options
        .device_path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    let mut related_ids: Vec<i32> = Vec::new();
    let mut id_to_name: HashMap<i32, String> = HashMap::new();
    if let Some(id) = options.device_id {
        if let Some(name) = xinput::device_name(id) {
            device_name = name;
        }
        let resolved = xinput::device_path(id);
        if !resolved.is_empty() {
            device_path = resolved;
        }
        related_ids = if options.include_related_tools {
            xinput::related_device_ids(id, false)
        } else {
            vec![id]
        };
        for &rid in &related_ids {
            if let Some(name) = xinput::device_name(rid) {
                id_to_name.insert(rid, name);
            }
        }
    }

    if device_path.is_empty() && options.device_id.is_none() {
        if requires_device || run_event_loop {
            return Err(anyhow!("no device specified; use --device-id or --device"));
        }
        return Ok(());
    }
    if device_path.is_empty() {
        return Err(anyhow!(
            "unable to determine device path for id {}",
            options.device_id.unwrap_or(-1)
        ));
    }

    let display_name = if device_name.is_empty() {
        device_path.clone()
    } else {
        device_name.clone()
    };
    let mut slug = config::slugify(&display_name);
    if let Some(id) = options.device_id {
        slug.push_str(&format!("_id{id}"));
    }
    let calibration_path = dirs.calibrations.join(format!("calibration_{slug}.ini"));

    let app_config = AppConfig::load_or_install_default().unwrap_or_else(|e| {
        warn!("using default thresholds: {e:#}");
        AppConfig::default()
    });
    let mut reader = TouchReader::with_thresholds(app_config.thresholds.clone());
    reader.start(&device_path)?;
    println!("Touch device: {device_path}");

    let result = run_with_reader(
        &reader,
        &options,
        &layout,
        &dirs,
        &calibration_path,
        &display_name,
        &related_ids,
        &id_to_name,
        run_event_loop,
    );
    reader.stop();
    result
}

#[allow(clippy::too_many_arguments)]
fn run_with_reader(
    reader: &TouchReader,
    options: &Options,
    layout: &DesktopLayout,
    dirs: &Dirs,
    calibration_path: &Path,
    display_name: &str,
    related_ids: &[i32],
    id_to_name: &HashMap<i32, String>,
    run_event_loop: bool,
) -> Result<()> {
    if options.calibrate {
        let (width, height) = options.resolution.unwrap_or((layout.width, layout.height));
        reader.run_calibration(width, height, options.margin_percent, options.use_affine)?;
        reader.save_calibration(calibration_path)?;
        annotate_calibration(calibration_path, options.device_id, display_name, layout);
        println!("Calibration saved: {}", calibration_path.display());
    } else if options.load_calibration || calibration_path.exists() {
        match reader.load_calibration(calibration_path) {
            Ok(()) => println!("Loaded calibration from {}", calibration_path.display()),
            Err(e) if options.load_calibration => return Err(e),
            Err(e) => info!("no stored calibration applied: {e:#}"),
        }
    }

    let mut target_ids: Vec<i32> = if related_ids.is_empty() {
        options.device_id.into_iter().collect()
    } else {
        related_ids.to_vec()
    };
    target_ids = xinput::filter_by_tool(&target_ids, id_to_name, &options.tool_filters);

    if options.reset_mapping && !target_ids.is_empty() {
        xinput::apply_ctm_all(&target_ids, &monitors::identity_ctm())?;
        println!("Coordinate Transformation Matrix reset to identity.");
    }

    if let Some(name) = &options.load_profile {
        let path = dirs.profiles.join(format!("{}.ini", config::slugify(name)));
        if !path.exists() {
            return Err(anyhow!("profile not found: {}", path.display()));
        }
        let profile = Profile::load_from(&path)?;
        if !options.reapply && !profile.matches_layout(layout) {
            return Err(anyhow!(
                "monitor layout changed since profile '{}' was saved (use --reapply to override)",
                profile.name
            ));
        }
        let device_id = options
            .device_id
            .ok_or_else(|| anyhow!("profile application requires --device-id"))?;
        let mut ids = if profile.include_related {
            xinput::related_device_ids(device_id, false)
        } else {
            vec![device_id]
        };
        ids = xinput::filter_by_tool(&ids, id_to_name, &profile.tool_filters);

        let monitor = monitors::find_by_name(layout, &profile.monitor.name)
            .or_else(|| monitors::find_by_index(layout, profile.monitor.index))
            .ok_or_else(|| anyhow!("unable to resolve monitor for profile"))?;
        let matrix = monitors::compute_ctm(layout, monitor);
        xinput::apply_ctm_all(&ids, &matrix)?;
        println!("Applied profile {} to monitor {}", profile.name, monitor.name);
        print_matrix(&matrix);
    }

    if let Some(name) = &options.save_profile {
        let monitor = select_monitor(layout, options)
            .or_else(|| layout.monitors.first())
            .ok_or_else(|| anyhow!("no monitor available for profile"))?;
        let matrix = monitors::compute_ctm(layout, monitor);
        let mut profile = Profile::from_layout(
            name,
            options.device_id.unwrap_or(-1),
            display_name,
            layout,
            monitor.clone(),
            matrix,
        );
        profile.include_related = options.include_related_tools;
        profile.tool_filters = options.tool_filters.clone();
        let path = dirs.profiles.join(format!("{}.ini", config::slugify(name)));
        profile.save_to(&path)?;
        println!("Profile saved: {}", path.display());
    }

    if options.map_full_desktop {
        xinput::apply_ctm_all(&target_ids, &monitors::identity_ctm())?;
        println!("Applied full-desktop mapping.");
        print_matrix(&monitors::identity_ctm());
    } else if options.monitor_index.is_some() || options.monitor_name.is_some() {
        let monitor = select_monitor(layout, options)
            .ok_or_else(|| anyhow!("unable to resolve monitor selection"))?;
        let matrix = monitors::compute_ctm(layout, monitor);
        xinput::apply_ctm_all(&target_ids, &matrix)?;
        println!("Applied mapping to monitor {}", monitor.name);
        print_matrix(&matrix);
    }

    if options.status {
        print_status(reader, layout, calibration_path, related_ids, id_to_name);
    }

    if run_event_loop {
        event_loop(reader);
    }
    Ok(())
}

fn select_monitor<'a>(layout: &'a DesktopLayout, options: &Options) -> Option<&'a Monitor> {
    if let Some(name) = &options.monitor_name {
        return monitors::find_by_name(layout, name);
    }
    if let Some(index) = options.monitor_index {
        return monitors::find_by_index(layout, index);
    }
    None
}

/// Record which device and layout a calibration file belongs to.
fn annotate_calibration(
    path: &Path,
    device_id: Option<i32>,
    device_name: &str,
    layout: &DesktopLayout,
) {
    let Ok(mut data) = IniData::load(path) else {
        return;
    };
    if let Some(id) = device_id {
        data.set("Metadata", "device_id", id.to_string());
    }
    data.set("Metadata", "device_name", device_name);
    data.set("Metadata", "layout_hash", layout.hash.as_str());
    if let Err(e) = data.save(path) {
        warn!("failed to annotate calibration file: {e:#}");
    }
}

fn event_loop(reader: &TouchReader) {
    let handler = on_sigint as extern "C" fn(libc::c_int);
    unsafe {
        libc::signal(libc::SIGINT, handler as libc::sighandler_t);
    }
    println!("Press Ctrl+C to exit");
    while !INTERRUPTED.load(Ordering::SeqCst) && reader.is_running() {
        if let Some(event) = reader.wait_event(Some(Duration::from_millis(250))) {
            print_event(&event);
        }
    }
}

fn print_event(event: &TouchEvent) {
    let name = match event.kind {
        EventKind::TouchDown => "Down",
        EventKind::TouchUp => "Up",
        EventKind::TouchMove => "Move",
        EventKind::SwipeLeft => "SwipeLeft",
        EventKind::SwipeRight => "SwipeRight",
        EventKind::SwipeUp => "SwipeUp",
        EventKind::SwipeDown => "SwipeDown",
        EventKind::PinchIn => "PinchIn",
        EventKind::PinchOut => "PinchOut",
        EventKind::LongPress => "LongPress",
        EventKind::DoubleTap => "DoubleTap",
        EventKind::Rotate => "Rotate",
    };
    println!(
        "Event: {name} x={} y={} touches={} value={}",
        event.x, event.y, event.touch_count, event.value
    );
}

fn nothing_else_requested(options: &Options) -> bool {
    !(options.calibrate
        || options.load_calibration
        || options.list_devices
        || options.list_monitors
        || options.list_profiles
        || options.status
        || options.reset_mapping
        || options.map_full_desktop
        || options.save_profile.is_some()
        || options.load_profile.is_some()
        || options.monitor_index.is_some()
        || options.monitor_name.is_some()
        || options.device_id.is_some()
        || options.device_path.is_some())
}

fn list_devices() {
    let devices = xinput::enumerate_devices();
    if devices.is_empty() {
        println!("No devices found via xinput.");
        return;
    }
    println!("Available input devices:");
    for device in devices {
        print!("  ID {}: {}", device.id, device.name);
        if device.is_absolute {
            print!(" [absolute {}x{}]", device.max_x, device.max_y);
        } else {
            print!(" [relative]");
        }
        if !device.path.is_empty() {
            print!(" -- {}", device.path);
        }
        println!();
    }
}

fn list_monitors(layout: &DesktopLayout) {
    println!("Detected monitors (layout hash: {})", layout.hash);
    for m in &layout.monitors {
        print!(
            "  [{}] {} {}x{} +{}+{}",
            m.index, m.name, m.width, m.height, m.x, m.y
        );
        if m.primary {
            print!(" (primary)");
        }
        print!(" rot={}", m.rotation.as_str());
        if m.scale_x != 1.0 || m.scale_y != 1.0 {
            print!(" scale={}x{}", m.scale_x, m.scale_y);
        }
        if !m.edid_hash.is_empty() {
            print!(" edid={}", m.edid_hash);
        }
        println!();
    }
}

fn list_profiles(profile_dir: &Path) {
    let Ok(entries) = std::fs::read_dir(profile_dir) else {
        println!("Profile directory does not exist: {}", profile_dir.display());
        return;
    };
    let mut any = false;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().map(|e| e != "ini").unwrap_or(true) {
            continue;
        }
        let Ok(profile) = Profile::load_from(&path) else {
            continue;
        };
        any = true;
        println!(
            "  {} -> monitor {}, layout {}",
            profile.name,
            if profile.monitor.name.is_empty() {
                "?"
            } else {
                &profile.monitor.name
            },
            if profile.layout_hash.is_empty() {
                "?"
            } else {
                &profile.layout_hash
            }
        );
    }
    if !any {
        println!("No profile files found in {}", profile_dir.display());
    }
}

fn print_status(
    reader: &TouchReader,
    layout: &DesktopLayout,
    calibration_path: &Path,
    related_ids: &[i32],
    id_to_name: &HashMap<i32, String>,
) {
    println!("=== Status ===");
    list_monitors(layout);

    let calibration = reader.calibration();
    println!("Calibration mode: {}", calibration.mode.as_str());
    println!(
        "Calibration X range: [{:.2}, {:.2}]",
        calibration.min_x, calibration.max_x
    );
    println!(
        "Calibration Y range: [{:.2}, {:.2}]",
        calibration.min_y, calibration.max_y
    );
    println!(
        "Calibration screen size: {}x{}",
        calibration.screen_width, calibration.screen_height
    );
    println!("Calibration margin: {:.2}%", calibration.margin_percent);
    if calibration_path.exists() {
        println!("Calibration file: {}", calibration_path.display());
    } else {
        println!("Calibration file not found: {}", calibration_path.display());
    }

    if !related_ids.is_empty() {
        println!("Current CTM matrices:");
        for &id in related_ids {
            let Some(matrix) = xinput::read_ctm(id) else {
                continue;
            };
            match id_to_name.get(&id) {
                Some(name) => println!("  Device {id} ({name})"),
                None => println!("  Device {id}"),
            }
            print_matrix(&matrix);
        }
    }
}

fn print_matrix(matrix: &[f64; 9]) {
    println!("[{:.6} {:.6} {:.6}]", matrix[0], matrix[1], matrix[2]);
    println!(" {:.6} {:.6} {:.6}", matrix[3], matrix[4], matrix[5]);
    println!(" {:.6} {:.6} {:.6}", matrix[6], matrix[7], matrix[8]);
}

fn print_udev_instructions() {
    println!("To grant access to touch devices without root permissions, add a udev rule:");
    println!("  sudo tee /etc/udev/rules.d/99-touchscreen.rules <<'EOF'");
    println!("  SUBSYSTEM==\"input\", GROUP=\"input\", MODE=\"0660\"");
    println!("EOF");
    println!("Then add your user to the 'input' group and reload rules:");
    println!("  sudo usermod -aG input $USER");
    println!("  sudo udevadm control --reload && sudo udevadm trigger");
    println!("Log out and back in to apply the new group membership.");
}

fn print_doctor_report() {
    let uinput_present = Path::new("/dev/uinput").exists();
    println!("uinput present: {uinput_present}");
    println!("input group member: {}", in_input_group());
    let devices = crate::input::discover_multitouch();
    if devices.is_empty() {
        println!("multitouch devices: none detected");
    } else {
        println!("multitouch devices:");
        for (path, name) in devices {
            println!("  {} ({})", name, path.display());
        }
    }
    println!("config dir: {}", config::config_dir().display());
}

fn in_input_group() -> bool {
    let Ok(groups) = std::fs::read_to_string("/etc/group") else {
        return false;
    };
    let user = whoami::username();
    groups
        .lines()
        .filter(|line| line.starts_with("input:"))
        .any(|line| {
            line.rsplit(':')
                .next()
                .unwrap_or("")
                .split(',')
                .any(|member| member.trim() == user)
        })
}

fn print_help() {
    println!(
        r#"touchmap - touchscreen/tablet calibration and monitor mapping

USAGE:
  touchmap [options]

OPTIONS:
  -h, --help                Show this help
  -d, --device PATH         Path to the input device node
      --device-id ID        XInput device id
  -c, --calibrate           Run four-corner calibration
  -l, --load                Load stored calibration
      --list-devices        List input devices
      --list-monitors       List monitors
      --status              Print current status (no event loop)
  -m, --monitor INDEX       Target monitor index for mapping
      --monitor-name NAME   Target monitor by name
      --map-full            Map to the entire desktop
      --reset-ctm           Reset the Coordinate Transformation Matrix
  -r, --resolution WxH      Calibration target size (default: desktop size)
      --margin PERCENT      Dead-zone margin per side (default 0.5)
      --affine              Use the affine calibration fit
      --tool LIST           Comma-separated tool filters (stylus,eraser,cursor,pad)
      --no-related-tools    Apply only to the given device id
      --save-profile NAME   Save the current mapping profile
      --load-profile NAME   Load a mapping profile
      --list-profiles       List saved profiles
      --reapply             Apply a profile even if the layout changed
      --config-dir PATH     Base directory for calibration/profile files
      --calibration-dir PATH  Override the calibration directory
      --profile-dir PATH    Override the profile directory
      --no-loop             Run setup and exit without reading events
      --doctor              Check permissions and list touch devices
      --udev-install        Print udev rule instructions
"#
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options_from(args: &[&str]) -> Options {
        let args: Vec<std::ffi::OsString> = args.iter().map(|a| (*a).into()).collect();
        parse_options(Arguments::from_vec(args)).unwrap().unwrap()
    }

    #[test]
    fn defaults_keep_the_event_loop_on() {
        let options = options_from(&[]);
        assert!(options.run_event_loop);
        assert!(options.include_related_tools);
        assert_eq!(options.margin_percent, 0.5);
    }

    #[test]
    fn status_disables_the_event_loop() {
        let options = options_from(&["--status"]);
        assert!(options.status);
        assert!(!options.run_event_loop);
    }

    #[test]
    fn resolution_and_tools_are_parsed() {
        let options = options_from(&[
            "--resolution",
            "1920x1080",
            "--tool",
            "Stylus, Eraser",
            "--device-id",
            "12",
        ]);
        assert_eq!(options.resolution, Some((1920, 1080)));
        assert_eq!(options.tool_filters, vec!["stylus", "eraser"]);
        assert_eq!(options.device_id, Some(12));
    }

    #[test]
    fn bad_resolution_is_rejected() {
        let args: Vec<std::ffi::OsString> = vec!["--resolution".into(), "wide".into()];
        assert!(parse_options(Arguments::from_vec(args)).is_err());
    }
}

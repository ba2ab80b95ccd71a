//! Host driver for the RV64 emulator core: windowed mode (winit + pixels)
//! or headless batch mode, a demo kernel syscall handler so the workspace
//! boots something end to end, and the optional JIT backend.

use std::path::PathBuf;
use std::process;
use std::time::{Duration, Instant};

use rv64_core::memory::{DEFAULT_MEMORY_SIZE, FRAMEBUFFER_HEIGHT, FRAMEBUFFER_SIZE, FRAMEBUFFER_WIDTH};
use rv64_core::{KeyEventKind, Modifiers, MouseButton, MouseEventKind, SyscallHandler, Vm, VmState};
use pixels::{Pixels, SurfaceTexture};
use winit::application::ApplicationHandler;
use winit::event::{ElementState, MouseButton as WinitMouseButton, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowAttributes, WindowId};

const DEFAULT_LOAD_ADDRESS: u64 = 0x8000_0000;
const BENCH_MEMORY_SIZE: usize = 4 * 1024 * 1024;
const SCALE: u32 = 1;
const FRAME_DURATION: Duration = Duration::from_micros(16_667);

// ---------------------------------------------------------------------------
// CLI argument parsing
// ---------------------------------------------------------------------------

struct CliArgs {
    kernel_path: Option<PathBuf>,
    load_address: u64,
    memory_size: Option<usize>,
    jit: bool,
    headless: bool,
    steps: u64,
    snapshot_out: Option<PathBuf>,
    snapshot_in: Option<PathBuf>,
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut cli = CliArgs {
        kernel_path: None,
        load_address: DEFAULT_LOAD_ADDRESS,
        memory_size: None,
        jit: false,
        headless: false,
        steps: 1_000_000,
        snapshot_out: None,
        snapshot_in: None,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--kernel" => {
                i += 1;
                cli.kernel_path = args.get(i).map(PathBuf::from);
            }
            "--load-address" => {
                i += 1;
                if let Some(s) = args.get(i) {
                    cli.load_address = parse_hex_or_dec(s).unwrap_or_else(|| {
                        eprintln!("Invalid --load-address value: {s}");
                        process::exit(1);
                    });
                }
            }
            "--memory-size" => {
                i += 1;
                if let Some(s) = args.get(i) {
                    cli.memory_size = s.parse().ok();
                }
            }
            "--jit" => cli.jit = true,
            "--headless" => cli.headless = true,
            "--steps" => {
                i += 1;
                if let Some(s) = args.get(i) {
                    cli.steps = s.parse().unwrap_or(1_000_000);
                }
            }
            "--snapshot-out" => {
                i += 1;
                cli.snapshot_out = args.get(i).map(PathBuf::from);
            }
            "--snapshot-in" => {
                i += 1;
                cli.snapshot_in = args.get(i).map(PathBuf::from);
            }
            "--help" | "-h" => {
                eprintln!("Usage: rv64-runner --kernel <elf> [OPTIONS]");
                eprintln!();
                eprintln!("Options:");
                eprintln!("  --kernel <path>        ELF image to load (RV64GC-subset)");
                eprintln!("  --load-address <hex>   Load address [default: 0x80000000]");
                eprintln!("  --memory-size <bytes>  Guest memory size [default: 8 MiB, 4 MiB with --jit]");
                eprintln!("  --jit                  Enable the template JIT backend");
                eprintln!("  --headless             Run without a window, then exit");
                eprintln!("  --steps <n>            Headless step budget [default: 1000000]");
                eprintln!("  --snapshot-out <path>  Write a snapshot after the run");
                eprintln!("  --snapshot-in <path>   Restore from a snapshot before running");
                process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                process::exit(1);
            }
        }
        i += 1;
    }

    cli
}

fn parse_hex_or_dec(s: &str) -> Option<u64> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        s.parse().ok()
    }
}

// ---------------------------------------------------------------------------
// Demo kernel: services every syscall number not claimed by the engine's
// internal subset (60/70/71/72). This is a sample so the workspace boots
// end to end, not part of the core's contract.
// ---------------------------------------------------------------------------

struct DemoKernel;

impl SyscallHandler for DemoKernel {
    fn handle(&mut self, num: u64, a0: u64, _a1: u64, _a2: u64, _a3: u64) -> u64 {
        match num {
            2 => {
                eprintln!("guest exited with code {a0}");
                0
            }
            other => {
                eprintln!("unhandled kernel call {other}");
                (-2i64) as u64
            }
        }
    }
}

// ---------------------------------------------------------------------------
// VM construction shared by headless and windowed modes
// ---------------------------------------------------------------------------

fn make_vm(cli: &CliArgs) -> Vm {
    let memory_size = cli.memory_size.unwrap_or(if cli.jit { BENCH_MEMORY_SIZE } else { DEFAULT_MEMORY_SIZE });
    let mut vm = Vm::new(memory_size, FRAMEBUFFER_SIZE);

    let image = cli.kernel_path.as_ref().map(|path| {
        let bytes = std::fs::read(path).unwrap_or_else(|e| {
            eprintln!("Failed to read kernel file {}: {e}", path.display());
            process::exit(1);
        });
        rv64_elf::load(&bytes).unwrap_or_else(|e| {
            eprintln!("Failed to parse ELF {}: {e}", path.display());
            process::exit(1);
        })
    });

    let load_address = image.as_ref().map_or(cli.load_address, |loaded| loaded.entry);
    let image_bytes = image.as_ref().map(|loaded| loaded.image.as_slice());
    if let Err(e) = vm.init(image_bytes, load_address) {
        eprintln!("Failed to initialize VM: {e}");
        process::exit(1);
    }

    vm.set_syscall_handler(Box::new(DemoKernel));
    vm.set_serial_output(Box::new(|byte: u8| {
        print!("{}", byte as char);
    }));

    #[cfg(feature = "jit")]
    if cli.jit {
        match rv64_jit::JitContext::new() {
            Ok(backend) => {
                if let Err(e) = vm.enable_jit(Box::new(backend)) {
                    eprintln!("Failed to enable JIT: {e}");
                    process::exit(1);
                }
            }
            Err(e) => {
                eprintln!("Failed to initialize JIT arena: {e}");
                process::exit(1);
            }
        }
    }
    #[cfg(not(feature = "jit"))]
    if cli.jit {
        eprintln!("This build was compiled without the `jit` feature; ignoring --jit");
    }

    if let Some(ref path) = cli.snapshot_in {
        match std::fs::read(path) {
            Ok(bytes) => restore_snapshot(&mut vm, &bytes),
            Err(e) => {
                eprintln!("Failed to read snapshot {}: {e}", path.display());
                process::exit(1);
            }
        }
    }

    vm.start();
    vm
}

/// Snapshot format is implementation-defined; this driver only needs to
/// round-trip its own output, so a fixed little-endian
/// `[pc][x1..x31]` record plus the raw memory buffer is enough.
fn restore_snapshot(vm: &mut Vm, bytes: &[u8]) {
    if bytes.len() < 8 {
        eprintln!("Snapshot file too short");
        return;
    }
    let mut pc_bytes = [0u8; 8];
    pc_bytes.copy_from_slice(&bytes[0..8]);
    vm.regs_mut().pc = u64::from_le_bytes(pc_bytes);
    let mem = vm.memory_mut().as_mut_slice();
    let payload = &bytes[8..];
    let n = payload.len().min(mem.len());
    mem[..n].copy_from_slice(&payload[..n]);
}

fn save_snapshot(vm: &Vm, path: &PathBuf) {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&vm.regs().pc.to_le_bytes());
    bytes.extend_from_slice(vm.memory().as_slice());
    if let Err(e) = std::fs::write(path, &bytes) {
        eprintln!("Failed to write snapshot {}: {e}", path.display());
        process::exit(1);
    }
    eprintln!("Snapshot written to {}", path.display());
}

fn step(vm: &mut Vm, use_jit: bool) -> bool {
    let result = if use_jit { vm.step_jit() } else { vm.step() };
    result.is_ok() && vm.state() == VmState::Running
}

// ---------------------------------------------------------------------------
// Headless mode
// ---------------------------------------------------------------------------

fn run_headless(cli: &CliArgs) {
    let mut vm = make_vm(cli);
    let mut executed = 0u64;
    while executed < cli.steps && vm.state() == VmState::Running {
        if !step(&mut vm, cli.jit) {
            break;
        }
        executed += 1;
    }

    if let Some(fault) = vm.last_error() {
        eprintln!("Halted on fault after {executed} steps: {fault}");
    } else {
        eprintln!("Ran {executed} steps, final state {:?}", vm.state());
    }
    eprintln!("JIT fallback count: {}", vm.jit_fallback_count());

    if let Some(ref path) = cli.snapshot_out {
        save_snapshot(&vm, path);
    }
}

// ---------------------------------------------------------------------------
// Windowed mode (winit + pixels)
// ---------------------------------------------------------------------------

struct App {
    vm: Vm,
    use_jit: bool,
    snapshot_out: Option<PathBuf>,
    window: Option<&'static Window>,
    pixels: Option<Pixels<'static>>,
    last_frame_time: Instant,
}

impl App {
    fn new(vm: Vm, use_jit: bool, snapshot_out: Option<PathBuf>) -> Self {
        Self {
            vm,
            use_jit,
            snapshot_out,
            window: None,
            pixels: None,
            last_frame_time: Instant::now(),
        }
    }

    fn run_until_next_frame(&mut self) {
        const STEPS_PER_FRAME: u32 = 200_000;
        for _ in 0..STEPS_PER_FRAME {
            if self.vm.state() != VmState::Running {
                break;
            }
            if !step(&mut self.vm, self.use_jit) {
                if let Some(fault) = self.vm.last_error() {
                    eprintln!("Fault: {fault}");
                }
                break;
            }
        }
    }

    fn update_pixels(&mut self) {
        let Some(pixels) = self.pixels.as_mut() else {
            return;
        };
        let fb = self.vm.framebuffer();
        let frame = pixels.frame_mut();
        let len = frame.len().min(fb.len());
        frame[..len].copy_from_slice(&fb[..len]);
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window_size = winit::dpi::LogicalSize::new(FRAMEBUFFER_WIDTH * SCALE, FRAMEBUFFER_HEIGHT * SCALE);
        let attrs = WindowAttributes::default()
            .with_title("rv64-runner")
            .with_inner_size(window_size);

        match event_loop.create_window(attrs) {
            Ok(window) => {
                // Leak the window to get a 'static reference: it lives for
                // the whole process and the OS reclaims it on exit.
                let window: &'static Window = Box::leak(Box::new(window));
                let inner = window.inner_size();
                let surface = SurfaceTexture::new(inner.width, inner.height, window);
                match Pixels::new(FRAMEBUFFER_WIDTH, FRAMEBUFFER_HEIGHT, surface) {
                    Ok(pixels) => self.pixels = Some(pixels),
                    Err(e) => {
                        eprintln!("Failed to create pixels: {e}");
                        event_loop.exit();
                        return;
                    }
                }
                self.window = Some(window);
            }
            Err(e) => {
                eprintln!("Failed to create window: {e}");
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                if let Some(ref path) = self.snapshot_out {
                    save_snapshot(&self.vm, path);
                }
                event_loop.exit();
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if let PhysicalKey::Code(keycode) = event.physical_key {
                    if keycode == KeyCode::Escape && event.state == ElementState::Pressed {
                        event_loop.exit();
                        return;
                    }
                    let kind = if event.state == ElementState::Pressed {
                        KeyEventKind::Down
                    } else {
                        KeyEventKind::Up
                    };
                    self.vm.inject_keyboard_event(kind, keycode as u32, None, Modifiers::default());
                }
            }
            WindowEvent::MouseInput { state, button, .. } => {
                let mapped = match button {
                    WinitMouseButton::Left => MouseButton::Left,
                    WinitMouseButton::Right => MouseButton::Right,
                    _ => MouseButton::Middle,
                };
                let kind =
                    if state == ElementState::Pressed { MouseEventKind::ButtonDown } else { MouseEventKind::ButtonUp };
                self.vm.inject_mouse_event(kind, mapped, 0, 0, Modifiers::default());
            }
            WindowEvent::CursorMoved { position, .. } => {
                self.vm.inject_mouse_event(
                    MouseEventKind::Move,
                    MouseButton::Left,
                    position.x as i32,
                    position.y as i32,
                    Modifiers::default(),
                );
            }
            WindowEvent::RedrawRequested => {
                let now = Instant::now();
                if now.duration_since(self.last_frame_time) >= FRAME_DURATION {
                    self.run_until_next_frame();
                    self.update_pixels();
                    self.last_frame_time = now;
                }
                if let Some(pixels) = self.pixels.as_ref() {
                    if let Err(e) = pixels.render() {
                        eprintln!("Render error: {e}");
                        event_loop.exit();
                    }
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = self.window {
            window.request_redraw();
        }
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() {
    let cli = parse_args();

    if cli.headless {
        run_headless(&cli);
        return;
    }

    let use_jit = cli.jit;
    let snapshot_out = cli.snapshot_out.clone();
    let vm = make_vm(&cli);
    let mut app = App::new(vm, use_jit, snapshot_out);

    let event_loop = match EventLoop::new() {
        Ok(el) => el,
        Err(e) => {
            eprintln!("Failed to create event loop: {e}");
            process::exit(1);
        }
    };

    if let Err(e) = event_loop.run_app(&mut app) {
        eprintln!("Event loop error: {e}");
        process::exit(1);
    }
}

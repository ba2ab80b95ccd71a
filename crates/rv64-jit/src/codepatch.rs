//! Host-arch shim for writing into the W^X code arena.
//!
//! On Apple Silicon, a JIT-mapped (`MAP_JIT`) page must have its
//! per-thread write-protection toggled off before a write and back on
//! before the page is executed (`pthread_jit_write_protect_np`), and the
//! instruction cache must be explicitly synchronized with the data cache
//! after every write (`DC CVAU` / `IC IVAU` / `ISB`, per the ARMv8 cache
//! maintenance requirements for self-modifying/JIT code). Elsewhere these
//! are no-ops: Linux's `mmap` with `PROT_EXEC|PROT_WRITE` needs neither.

/// Flip off the calling thread's JIT write-protection so the next writes
/// to the arena are visible. A no-op outside `macOS`/`aarch64`.
#[cfg(all(target_os = "macos", target_arch = "aarch64"))]
pub fn begin_write() {
    unsafe { libc::pthread_jit_write_protect_np(0) };
}

#[cfg(not(all(target_os = "macos", target_arch = "aarch64")))]
pub fn begin_write() {}

/// Flip the calling thread's JIT write-protection back on before the
/// arena is executed. A no-op outside `macOS`/`aarch64`.
#[cfg(all(target_os = "macos", target_arch = "aarch64"))]
pub fn end_write() {
    unsafe { libc::pthread_jit_write_protect_np(1) };
}

#[cfg(not(all(target_os = "macos", target_arch = "aarch64")))]
pub fn end_write() {}

/// Synchronize the instruction cache with the data cache for `len` bytes
/// starting at `start`, so the CPU's instruction fetch path observes
/// code just written through the data path. Required on every `aarch64`
/// host (not just Apple Silicon) because the two caches are not
/// automatically coherent; a no-op on other host architectures, which
/// this emulator's JIT does not target.
#[cfg(target_arch = "aarch64")]
pub fn flush_icache(start: *const u8, len: usize) {
    const CACHE_LINE: usize = 64;
    let mut addr = (start as usize) & !(CACHE_LINE - 1);
    let end = (start as usize) + len;
    while addr < end {
        unsafe {
            std::arch::asm!(
                "dc cvau, {addr}",
                addr = in(reg) addr,
                options(nostack, preserves_flags),
            );
        }
        addr += CACHE_LINE;
    }
    unsafe { std::arch::asm!("dsb ish", options(nostack, preserves_flags)) };

    let mut addr = (start as usize) & !(CACHE_LINE - 1);
    while addr < end {
        unsafe {
            std::arch::asm!(
                "ic ivau, {addr}",
                addr = in(reg) addr,
                options(nostack, preserves_flags),
            );
        }
        addr += CACHE_LINE;
    }
    unsafe {
        std::arch::asm!("dsb ish", "isb", options(nostack, preserves_flags));
    }
}

#[cfg(not(target_arch = "aarch64"))]
pub fn flush_icache(_start: *const u8, _len: usize) {}

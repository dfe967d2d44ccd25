//! Cortex-M4 port implementation
//!
//! The system lock raises BASEPRI to `CFG_KERNEL_BASEPRI`. Context switches
//! are deferred to the PendSV exception, which runs at the lowest priority
//! and therefore only once the lock has been released.

#![allow(named_asm_labels)]

use core::arch::naked_asm;
use core::ptr::{addr_of_mut, null_mut};

use cortex_m::peripheral::scb::SystemHandler;
use cortex_m::peripheral::syst::SystClkSource;

use super::{Context, ExitFn, Port, ThreadFn, ThreadStart};
use crate::config::CFG_KERNEL_BASEPRI;
use crate::critical::{get_basepri, is_isr_context, set_basepri};
use crate::types::{OsMsg, OsStkElement};

/// Pending switch, consumed by PendSV
#[repr(C)]
struct SwitchRequest {
    /// Context to save into, null on the very first switch
    from: *mut Context,
    to: *mut Context,
}

#[no_mangle]
static mut SWITCH_REQ: SwitchRequest = SwitchRequest {
    from: null_mut(),
    to: null_mut(),
};

/// Cortex-M4 port
pub struct CortexM4;

impl CortexM4 {
    pub const fn new() -> Self {
        CortexM4
    }
}

impl Default for CortexM4 {
    fn default() -> Self {
        Self::new()
    }
}

/// Initialize SysTick timer for system tick generation
///
/// # Example
/// For 16MHz clock with 1000Hz tick rate: `systick_init(16_000_000 / 1000)`
pub fn systick_init(cnts: u32) {
    let mut p = unsafe { cortex_m::Peripherals::steal() };

    p.SYST.set_reload(cnts - 1);
    p.SYST.clear_current();
    p.SYST.set_clock_source(SystClkSource::Core);
    p.SYST.enable_interrupt();
    p.SYST.enable_counter();
}

/// Frame built on a new thread's stack, as restored by PendSV
#[repr(C, align(4))]
struct ThreadFrame {
    r4: u32,
    r5: u32,
    r6: u32,
    r7: u32,
    r8: u32,
    r9: u32,
    r10: u32,
    r11: u32,
    exc_return: u32,
    r0: u32,
    r1: u32,
    r2: u32,
    r3: u32,
    r12: u32,
    lr: u32,
    pc: u32,
    xpsr: u32,
}

const FRAME_WORDS: usize = 17;

/// First code run by every thread
extern "C" fn thread_start(entry: ThreadFn, arg: usize, exit: ExitFn, kernel: usize) -> ! {
    let msg: OsMsg = entry(arg);
    unsafe { exit(kernel, msg) }
}

extern "C" fn thread_returned() -> ! {
    CortexM4::halt("thread start returned")
}

impl Port for CortexM4 {
    type LockState = u8;

    #[inline(always)]
    fn lock() -> u8 {
        let old = get_basepri();
        set_basepri(CFG_KERNEL_BASEPRI);
        cortex_m::asm::isb();
        old
    }

    #[inline(always)]
    fn unlock(old: u8) {
        set_basepri(old);
        cortex_m::asm::isb();
    }

    unsafe fn setup_context(
        &self,
        _wabase: *mut OsStkElement,
        waend: *mut OsStkElement,
        start: &ThreadStart,
    ) -> Context {
        unsafe {
            let top = ((waend as usize) & !7) as *mut u32;
            let frame = top.sub(FRAME_WORDS) as *mut ThreadFrame;

            frame.write(ThreadFrame {
                r4: 0x04040404,
                r5: 0x05050505,
                r6: 0x06060606,
                r7: 0x07070707,
                r8: 0x08080808,
                r9: 0x09090909,
                r10: 0x10101010,
                r11: 0x11111111,
                exc_return: 0xFFFF_FFFD,
                r0: start.entry as usize as u32,
                r1: start.arg as u32,
                r2: start.exit as usize as u32,
                r3: start.kernel as u32,
                r12: 0,
                lr: thread_returned as usize as u32,
                pc: (thread_start as usize as u32) | 1,
                xpsr: 0x0100_0000,
            });

            Context { sp: frame as usize }
        }
    }

    unsafe fn switch_context(&self, from: *mut Context, to: *mut Context) {
        unsafe {
            let req = &mut *addr_of_mut!(SWITCH_REQ);
            // A still pending request keeps its outgoing context
            if req.to.is_null() {
                req.from = from;
            }
            req.to = to;
        }
        cortex_m::peripheral::SCB::set_pendsv();
    }

    unsafe fn start_first(&self, to: *mut Context) {
        unsafe {
            let mut scb = cortex_m::Peripherals::steal().SCB;
            scb.set_priority(SystemHandler::PendSV, 0xF0);
            scb.set_priority(SystemHandler::SysTick, 0xF0);

            let req = &mut *addr_of_mut!(SWITCH_REQ);
            req.from = null_mut();
            req.to = to;

            cortex_m::interrupt::enable();
        }
        cortex_m::peripheral::SCB::set_pendsv();
    }

    fn is_isr_context() -> bool {
        is_isr_context()
    }

    fn halt(reason: &'static str) -> ! {
        cortex_m::interrupt::disable();
        crate::error!("halt: {}", reason);
        #[cfg(feature = "semihosting")]
        cortex_m_semihosting::hprintln!("halt: {}", reason);
        #[cfg(not(any(feature = "defmt", feature = "semihosting")))]
        let _ = reason;
        loop {
            cortex_m::asm::nop();
        }
    }

    #[inline(always)]
    fn idle() {
        cortex_m::asm::wfi();
    }
}

/// Store the outgoing stack pointer, return the incoming one (0: no restore)
#[inline(never)]
#[no_mangle]
unsafe extern "C" fn pendsv_switch(cur_sp: usize) -> usize {
    unsafe {
        let req = &mut *addr_of_mut!(SWITCH_REQ);
        if !req.from.is_null() {
            (*req.from).sp = cur_sp;
        }
        let to = req.to;
        req.from = null_mut();
        req.to = null_mut();

        if to.is_null() {
            0
        } else {
            (*to).sp
        }
    }
}

/// PendSV exception handler - performs the deferred context switch
///
/// 1. Save R4-R11, LR on the outgoing PSP (skipped on the first switch)
/// 2. Let `pendsv_switch` store and exchange the stack pointers
/// 3. Restore R4-R11, LR from the incoming stack
/// 4. Exception return
#[no_mangle]
#[unsafe(naked)]
pub unsafe extern "C" fn PendSV() {
    naked_asm!(
        "cpsid i",
        "dsb",
        "isb",

        "mrs r0, psp",

        "ldr r2, ={req}",
        "ldr r1, [r2]",
        "cbz r1, 1f",

        "stmdb r0!, {{r4-r11, lr}}",

        "1:",
        "push {{r3, lr}}",
        "bl pendsv_switch",
        "pop {{r3, lr}}",

        "cbz r0, 2f",
        "ldmia r0!, {{r4-r11, lr}}",
        "msr psp, r0",

        "2:",
        "cpsie i",
        "dsb",
        "isb",

        "bx lr",

        req = sym SWITCH_REQ,
    );
}

//! Priority Inversion Demo - mutex priority inheritance
//!
//! Three threads: High(30), Med(20), Low(10)
//! Low holds the mutex -> High waits -> Low boosted to 30, Med cannot
//! preempt it

#![no_std]
#![no_main]

use core::cell::Cell;
use core::ptr::addr_of_mut;
use core::sync::atomic::{AtomicU32, Ordering};

use cortex_m_rt::{entry, exception};
use critical_section::Mutex as CsMutex;
use defmt::info;
use rtkernel::port::cortex_m4::systick_init;
use rtkernel::port::CortexM4;
use rtkernel::time::ms2i;
use rtkernel::{Kernel, KernelConfig, Mutex, OsMsg, OsStkElement, ThreadDescriptor, CFG_TICK_RATE_HZ};

static KERNEL: Kernel<CortexM4> = Kernel::new(CortexM4::new(), KernelConfig::DEFAULT);

static TICKS: AtomicU32 = AtomicU32::new(0);
static HIGH_RUNS: AtomicU32 = AtomicU32::new(0);
static LOW_RUNS: AtomicU32 = AtomicU32::new(0);

static MTX: CsMutex<Cell<Option<Mutex>>> = CsMutex::new(Cell::new(None));

static mut HIGH_WA: [OsStkElement; 256] = [0; 256];
static mut MED_WA: [OsStkElement; 256] = [0; 256];
static mut LOW_WA: [OsStkElement; 256] = [0; 256];

defmt::timestamp!("{=u32}", TICKS.load(Ordering::Relaxed));

#[exception]
fn SysTick() {
    TICKS.fetch_add(1, Ordering::Relaxed);
    KERNEL.tick_isr();
}

fn mtx() -> Mutex {
    critical_section::with(|cs| MTX.borrow(cs).get()).expect("mutex not created")
}

/// High priority thread
fn high(_arg: usize) -> OsMsg {
    let mtx = mtx();
    KERNEL.sleep(ms2i(50));

    loop {
        let n = HIGH_RUNS.fetch_add(1, Ordering::Relaxed) + 1;

        mtx.lock(&KERNEL);
        info!("[HIGH] acquired #{}", n);

        for _ in 0..1_000 {
            cortex_m::asm::nop();
        }

        mtx.unlock(&KERNEL);
        KERNEL.sleep(ms2i(100));
    }
}

/// Medium priority thread, CPU bound
fn med(_arg: usize) -> OsMsg {
    loop {
        for _ in 0..50_000 {
            cortex_m::asm::nop();
        }
        KERNEL.sleep(ms2i(10));
    }
}

/// Low priority thread, holds the mutex for long
fn low(_arg: usize) -> OsMsg {
    let mtx = mtx();
    loop {
        let n = LOW_RUNS.fetch_add(1, Ordering::Relaxed) + 1;

        mtx.lock(&KERNEL);
        info!("[LOW] holding #{}, prio {}", n, KERNEL.with_lock(|sys| sys.thread(sys.current()).prio()));

        for _ in 0..100_000 {
            cortex_m::asm::nop();
        }

        mtx.unlock(&KERNEL);
        KERNEL.sleep(ms2i(200));
    }
}

#[entry]
fn main() -> ! {
    info!("Priority Inversion Demo: H(30) M(20) L(10)");

    KERNEL.init().expect("kernel init failed");
    let m = KERNEL.with_lock(|sys| Mutex::create(sys)).expect("mutex creation failed");
    critical_section::with(|cs| MTX.borrow(cs).set(Some(m)));

    unsafe {
        KERNEL
            .create(ThreadDescriptor::new("L", &mut *addr_of_mut!(LOW_WA), 10, low, 0))
            .expect("low creation failed");
        KERNEL
            .create(ThreadDescriptor::new("M", &mut *addr_of_mut!(MED_WA), 20, med, 0))
            .expect("med creation failed");
        KERNEL
            .create(ThreadDescriptor::new("H", &mut *addr_of_mut!(HIGH_WA), 30, high, 0))
            .expect("high creation failed");
    }

    systick_init(16_000_000 / CFG_TICK_RATE_HZ);

    info!("Starting...");
    KERNEL.start().expect("kernel start failed");

    loop {
        cortex_m::asm::wfi();
    }
}

//! Producer-Consumer example with semaphores

#![no_std]
#![no_main]

use core::cell::Cell;
use core::ptr::addr_of_mut;
use core::sync::atomic::{AtomicU32, Ordering};

use cortex_m_rt::{entry, exception};
use critical_section::Mutex;
use defmt::info;
use rtkernel::port::cortex_m4::systick_init;
use rtkernel::port::CortexM4;
use rtkernel::time::ms2i;
use rtkernel::{Kernel, KernelConfig, OsMsg, OsStkElement, Semaphore, ThreadDescriptor, CFG_TICK_RATE_HZ};

static KERNEL: Kernel<CortexM4> = Kernel::new(CortexM4::new(), KernelConfig::DEFAULT);

static TICKS: AtomicU32 = AtomicU32::new(0);
static PRODUCED: AtomicU32 = AtomicU32::new(0);
static CONSUMED: AtomicU32 = AtomicU32::new(0);

static SEM: Mutex<Cell<Option<Semaphore>>> = Mutex::new(Cell::new(None));

static mut PRODUCER_WA: [OsStkElement; 256] = [0; 256];
static mut CONSUMER_WA: [OsStkElement; 256] = [0; 256];

defmt::timestamp!("{=u32}", TICKS.load(Ordering::Relaxed));

#[exception]
fn SysTick() {
    TICKS.fetch_add(1, Ordering::Relaxed);
    KERNEL.tick_isr();
}

fn sem() -> Semaphore {
    critical_section::with(|cs| SEM.borrow(cs).get()).expect("semaphore not created")
}

fn producer(_arg: usize) -> OsMsg {
    let sem = sem();
    loop {
        let n = PRODUCED.fetch_add(1, Ordering::Relaxed) + 1;
        sem.signal(&KERNEL);
        info!("[P] produced #{}", n);
        KERNEL.sleep(ms2i(200));
    }
}

fn consumer(_arg: usize) -> OsMsg {
    let sem = sem();
    loop {
        if !sem.wait(&KERNEL).is_ok() {
            continue;
        }
        let n = CONSUMED.fetch_add(1, Ordering::Relaxed) + 1;
        info!("[C] consumed #{}", n);
        for _ in 0..10_000 {
            cortex_m::asm::nop();
        }
    }
}

#[entry]
fn main() -> ! {
    info!("Producer-Consumer Demo");

    KERNEL.init().expect("kernel init failed");
    let s = KERNEL
        .with_lock(|sys| Semaphore::create(sys, 0))
        .expect("semaphore creation failed");
    critical_section::with(|cs| SEM.borrow(cs).set(Some(s)));

    unsafe {
        KERNEL
            .create(ThreadDescriptor::new("P", &mut *addr_of_mut!(PRODUCER_WA), 10, producer, 0))
            .expect("producer creation failed");
        KERNEL
            .create(ThreadDescriptor::new("C", &mut *addr_of_mut!(CONSUMER_WA), 15, consumer, 0))
            .expect("consumer creation failed");
    }

    systick_init(16_000_000 / CFG_TICK_RATE_HZ);

    info!("Starting...");
    KERNEL.start().expect("kernel start failed");

    loop {
        cortex_m::asm::wfi();
    }
}

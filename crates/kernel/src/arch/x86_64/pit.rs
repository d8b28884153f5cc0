//! Legacy PIC remapping and the PIT running as a periodic tick source.

use x86_64::instructions::port::Port;

const PIC1_CMD: u16 = 0x20;
const PIC1_DATA: u16 = 0x21;
const PIC2_CMD: u16 = 0xA0;
const PIC2_DATA: u16 = 0xA1;

const ICW1_INIT: u8 = 0x10;
const ICW1_ICW4: u8 = 0x01;
const ICW4_8086: u8 = 0x01;
const EOI: u8 = 0x20;

const PIT_CHANNEL0: u16 = 0x40;
const PIT_COMMAND: u16 = 0x43;
const PIT_RATE_GENERATOR: u8 = 0x36;
const PIT_FREQUENCY_HZ: u32 = 1_193_182;

/// Length of one timer tick, in microseconds.
pub const TICK_US: u64 = 1_000;

/// Vector the timer line is remapped to.
const TIMER_VECTOR: u8 = 32;

fn outb(port: u16, value: u8) {
    // SAFETY: Only PIC and PIT ports are written, during init or from the timer handler.
    unsafe { Port::<u8>::new(port).write(value) }
}

/// Remaps both PICs above the exception vectors, unmasks only the timer line and
/// programs the PIT to fire every [`TICK_US`].
pub fn start_timer() {
    outb(PIC1_CMD, ICW1_INIT | ICW1_ICW4);
    outb(PIC2_CMD, ICW1_INIT | ICW1_ICW4);
    outb(PIC1_DATA, TIMER_VECTOR);
    outb(PIC2_DATA, TIMER_VECTOR + 8);
    outb(PIC1_DATA, 4);
    outb(PIC2_DATA, 2);
    outb(PIC1_DATA, ICW4_8086);
    outb(PIC2_DATA, ICW4_8086);
    outb(PIC1_DATA, !0x01);
    outb(PIC2_DATA, 0xFF);

    let divisor = PIT_FREQUENCY_HZ / (1_000_000 / TICK_US as u32);
    outb(PIT_COMMAND, PIT_RATE_GENERATOR);
    outb(PIT_CHANNEL0, (divisor & 0xFF) as u8);
    outb(PIT_CHANNEL0, (divisor >> 8) as u8);
    log::debug!("timer started: {}us ticks, divisor {}", TICK_US, divisor);
}

pub fn acknowledge_timer() {
    outb(PIC1_CMD, EOI);
}

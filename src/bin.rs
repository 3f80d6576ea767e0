#![no_main]
#![no_std]

use defmt_brtt as _; // global logger
use panic_probe as _;

use core::{
    convert::Infallible,
    sync::atomic::{AtomicUsize, Ordering},
};

use defmt::{debug, info, trace, warn};
use gps_trail::{
    display::{self, DisplayError},
    rb::{Consumer, Producer, Ringbuf},
    Buzzer, Config, DisplaySurface, FixRecord, RecordSink, SetFrequency, TrailEngine,
};
use rtic_monotonics::{create_systick_token, systick::Systick};
use stm32l4xx_hal::{
    gpio::{Alternate, Output, PushPull, PA0, PA10, PA4, PA5, PA6, PA7, PA9},
    hal::{
        blocking::delay::DelayMs,
        spi::{Mode, Phase, Polarity},
        PwmPin,
    },
    pac::{RCC, SPI1, TIM2, USART1},
    prelude::*,
    serial::{self, Serial},
    spi::Spi,
};

type SharpMemDisplay = display::SharpMemDisplay<
    Spi<
        SPI1,
        (
            PA5<Alternate<PushPull, 5>>,
            PA6<Alternate<PushPull, 5>>,
            PA7<Alternate<PushPull, 5>>,
        ),
    >,
    PA4<Output<PushPull>>,
>;

type GpsUart = Serial<USART1, (PA9<Alternate<PushPull, 7>>, PA10<Alternate<PushPull, 7>>)>;

type Engine = TrailEngine<RingSink, PATH_CAPACITY>;

type Beeper = Buzzer<BuzzerPwm, BusyDelay>;

const GPS_BAUD: u32 = 9600;
const UART_RX_BUFSIZE: usize = 512;
const RECORD_BUFSIZE: usize = 8 * FixRecord::SIZE;
const PATH_CAPACITY: usize = 256;

static UART_RX_COUNTER: AtomicUsize = AtomicUsize::new(0);
static UART_RX_DROPPED: AtomicUsize = AtomicUsize::new(0);

// same panicking *behavior* as `panic-probe` but doesn't print a panic message
// this prevents the panic message being printed *twice* when `defmt::panic` is invoked
#[defmt::panic_handler]
fn panic() -> ! {
    cortex_m::asm::udf()
}

static COUNT: AtomicUsize = AtomicUsize::new(0);
defmt::timestamp!("{=usize}", {
    // NOTE(no-CAS) `timestamps` runs with interrupts disabled
    let n = COUNT.load(Ordering::Relaxed);
    COUNT.store(n + 1, Ordering::Relaxed);
    n
});

/// Hands fix records to the record task as raw bytes.
pub struct RingSink(Producer<u8, RECORD_BUFSIZE>);

impl RecordSink for RingSink {
    type Error = Infallible;

    fn append(&mut self, record: &FixRecord) -> nb::Result<(), Infallible> {
        self.0
            .try_write_slice(record.as_bytes())
            .map_err(|_| nb::Error::WouldBlock)
    }
}

#[derive(Debug, Copy, Clone, defmt::Format)]
pub struct FrequencyOutOfRange(pub u32);

/// TIM2 channel 1 on PA0 driving the piezo. The prescaler is picked per
/// frequency so the period always fits the 16-bit duty range.
pub struct BuzzerPwm {
    tim: TIM2,
    timer_hz: u32,
    _pin: PA0<Alternate<PushPull, 1>>,
}

impl BuzzerPwm {
    pub fn new(tim: TIM2, pin: PA0<Alternate<PushPull, 1>>, timer_hz: u32) -> Self {
        // SAFETY: Single read-modify-write of the TIM2 enable bit during init;
        // nothing else touches APB1ENR1 concurrently.
        unsafe {
            (*RCC::ptr()).apb1enr1.modify(|_, w| w.tim2en().set_bit());
        }
        // PWM mode 1 with preload on channel 1
        tim.ccmr1_output().write(|w| unsafe { w.bits((0b110 << 4) | (1 << 3)) });
        tim.cr1.write(|w| w.arpe().set_bit());
        Self {
            tim,
            timer_hz,
            _pin: pin,
        }
    }
}

impl SetFrequency for BuzzerPwm {
    type Error = FrequencyOutOfRange;

    fn set_frequency(&mut self, hz: u32) -> Result<(), FrequencyOutOfRange> {
        if hz == 0 || hz > self.timer_hz / 2 {
            return Err(FrequencyOutOfRange(hz));
        }
        let period = self.timer_hz / hz;
        let psc = (period - 1) / (1 << 16);
        let arr = period / (psc + 1) - 1;
        self.tim.psc.write(|w| unsafe { w.bits(psc) });
        self.tim.arr.write(|w| unsafe { w.bits(arr) });
        self.tim.egr.write(|w| w.ug().set_bit());
        self.tim.cr1.modify(|_, w| w.cen().set_bit());
        Ok(())
    }
}

impl PwmPin for BuzzerPwm {
    type Duty = u16;

    fn disable(&mut self) {
        self.tim.ccer.modify(|_, w| w.cc1e().clear_bit());
    }

    fn enable(&mut self) {
        self.tim.ccer.modify(|_, w| w.cc1e().set_bit());
    }

    fn get_duty(&self) -> u16 {
        self.tim.ccr1.read().bits() as u16
    }

    fn get_max_duty(&self) -> u16 {
        self.tim.arr.read().bits() as u16
    }

    fn set_duty(&mut self, duty: u16) {
        self.tim.ccr1.write(|w| unsafe { w.bits(duty as u32) });
    }
}

/// Spins the core; good enough for the short cue notes.
pub struct BusyDelay {
    cycles_per_ms: u32,
}

impl DelayMs<u32> for BusyDelay {
    fn delay_ms(&mut self, ms: u32) {
        for _ in 0..ms {
            cortex_m::asm::delay(self.cycles_per_ms);
        }
    }
}

#[rtic::app(
    device = stm32l4xx_hal::pac,
    dispatchers = [EXTI2, EXTI3],
)]
mod app {
    use super::*;

    #[shared]
    struct Shared {}

    #[local]
    struct Local {
        uart: GpsUart,
        rx_send: Producer<u8, UART_RX_BUFSIZE>,
    }

    #[init]
    fn init(cx: init::Context) -> (Shared, Local) {
        trace!("init enter");

        let config = Config::default();

        let mut flash = cx.device.FLASH.constrain();
        let mut rcc = cx.device.RCC.constrain();
        let mut pwr = cx.device.PWR.constrain(&mut rcc.apb1r1);
        let clocks = rcc.cfgr.freeze(&mut flash.acr, &mut pwr);

        let mut gpioa = cx.device.GPIOA.split(&mut rcc.ahb2);

        // Create SysTick monotonic for task scheduling
        Systick::start(cx.core.SYST, clocks.sysclk().raw(), create_systick_token!());

        // Initialize SPI and display
        let mut cs = gpioa
            .pa4
            .into_push_pull_output(&mut gpioa.moder, &mut gpioa.otyper);
        cs.set_low();
        let sck = gpioa
            .pa5
            .into_alternate(&mut gpioa.moder, &mut gpioa.otyper, &mut gpioa.afrl);
        let miso = gpioa
            .pa6
            .into_alternate(&mut gpioa.moder, &mut gpioa.otyper, &mut gpioa.afrl);
        let mosi = gpioa
            .pa7
            .into_alternate(&mut gpioa.moder, &mut gpioa.otyper, &mut gpioa.afrl);
        let spi1 = Spi::spi1(
            cx.device.SPI1,
            (sck, miso, mosi),
            Mode {
                phase: Phase::CaptureOnFirstTransition,
                polarity: Polarity::IdleLow,
            },
            2.MHz(),
            clocks,
            &mut rcc.apb2,
        );
        let mut display = SharpMemDisplay::new(spi1, cs);
        defmt::unwrap!(display.clear().map_err(|_| ()));

        // Initialize UART for GPS
        let tx = gpioa
            .pa9
            .into_alternate(&mut gpioa.moder, &mut gpioa.otyper, &mut gpioa.afrh);
        let rx = gpioa
            .pa10
            .into_alternate(&mut gpioa.moder, &mut gpioa.otyper, &mut gpioa.afrh);
        let mut uart = Serial::usart1(
            cx.device.USART1,
            (tx, rx),
            serial::Config::default().baudrate(GPS_BAUD.bps()),
            clocks,
            &mut rcc.apb2,
        );
        uart.listen(serial::Event::Rxne);

        // Create channels between the UART interrupt, the tick and the record log
        static UART_RX: Ringbuf<u8, UART_RX_BUFSIZE> = Ringbuf::new();
        let (rx_send, rx_recv) = defmt::unwrap!(UART_RX.try_split());
        static RECORDS: Ringbuf<u8, RECORD_BUFSIZE> = Ringbuf::new();
        let (record_send, record_recv) = defmt::unwrap!(RECORDS.try_split());

        let engine = defmt::unwrap!(Engine::new(&config, RingSink(record_send)));

        // Initialize the piezo on TIM2 channel 1
        let buzzer_pin = gpioa
            .pa0
            .into_alternate::<1>(&mut gpioa.moder, &mut gpioa.otyper, &mut gpioa.afrl);
        let buzzer = Buzzer::new(
            BuzzerPwm::new(cx.device.TIM2, buzzer_pin, clocks.pclk1().raw()),
            BusyDelay {
                cycles_per_ms: clocks.sysclk().raw() / 1000,
            },
        );

        defmt::unwrap!(tick_task::spawn(engine, display, buzzer, rx_recv, config.tick_ms).map_err(|_| ()));
        defmt::unwrap!(record_task::spawn(record_recv).map_err(|_| ()));

        info!("done initializing!");
        trace!("init exit");
        (Shared {}, Local { uart, rx_send })
    }

    #[idle]
    fn idle(_: idle::Context) -> ! {
        loop {
            // Only sleep in release mode, since the debugger doesn't interact with sleep very nicely
            #[cfg(debug_assertions)]
            cortex_m::asm::nop();
            #[cfg(not(debug_assertions))]
            cortex_m::asm::wfi();
        }
    }

    // Move received bytes into the intake ring; a full ring drops the byte
    #[task(binds = USART1, priority = 10, local = [uart, rx_send])]
    fn on_uart(cx: on_uart::Context) {
        while let Ok(b) = cx.local.uart.read() {
            UART_RX_COUNTER.fetch_add(1, Ordering::Relaxed);
            if cx.local.rx_send.try_write(b).is_err() {
                UART_RX_DROPPED.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    #[task(priority = 1)]
    async fn tick_task(
        _cx: tick_task::Context,
        mut engine: Engine,
        mut display: SharpMemDisplay,
        mut buzzer: Beeper,
        rx_recv: Consumer<u8, UART_RX_BUFSIZE>,
        tick_ms: u32,
    ) {
        trace!("tick_task enter");
        loop {
            // Never more than one ring's worth, so a chatty receiver can't starve the frame
            let commands = engine.tick(rx_recv.drain(UART_RX_BUFSIZE));
            debug!(
                "tick: rx {} dropped {} diag {}",
                UART_RX_COUNTER.load(Ordering::Relaxed),
                UART_RX_DROPPED.load(Ordering::Relaxed),
                engine.diagnostics()
            );

            if let Some(change) = engine.take_fix_change() {
                info!("fix {}", change);
                if let Err(FrequencyOutOfRange(hz)) = buzzer.play(change.cue()) {
                    warn!("buzzer cannot play {} Hz", hz);
                }
            }

            let Ok(()) = display.draw_commands(&commands);
            match display.flush().and_then(|()| display.toggle_vcom()) {
                Ok(()) => {}
                Err(DisplayError::Spi(_)) => warn!("display SPI write failed"),
                Err(DisplayError::Pin(_)) => warn!("display chip select failed"),
            }

            Systick::delay(tick_ms.millis()).await;
        }
    }

    // Stream stored fixes to the host over RTT
    #[task(priority = 2)]
    async fn record_task(_cx: record_task::Context, records: Consumer<u8, RECORD_BUFSIZE>) {
        let mut buf = [0u8; FixRecord::SIZE];
        loop {
            while records.len() >= FixRecord::SIZE {
                for (slot, b) in buf.iter_mut().zip(records.drain(FixRecord::SIZE)) {
                    *slot = b;
                }
                match FixRecord::from_bytes(&buf) {
                    Ok(record) => info!(
                        "record t={=i64} lat={=f64} lon={=f64} alt={=i32} valid={=u8} raw={=[u8]:x}",
                        record.timestamp,
                        record.lat_degrees(),
                        record.lon_degrees(),
                        record.alt_mm,
                        record.valid,
                        buf
                    ),
                    Err(_) => warn!("malformed record"),
                }
            }
            Systick::delay(100.millis()).await;
        }
    }
}

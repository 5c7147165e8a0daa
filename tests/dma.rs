use onyx::{
    hw::sh4::{
        dmac::{CHCR_TE, DMAOR_NMIF},
        regs,
    },
    Context, DdtMode, DdtTransfer, DmaDataStatus, ExceptionSource, InterruptLine, LineState,
    MemoryBus, NullDevices, SH4EventData, Scheduler, Sh4, Sh4Config, Sh4Devices, SystemRam,
};

const SAR0: u32 = 0xffa0_0000;
const DAR0: u32 = 0xffa0_0004;
const DMATCR0: u32 = 0xffa0_0008;
const CHCR0: u32 = 0xffa0_000c;
const SAR1: u32 = 0xffa0_0010;
const DAR1: u32 = 0xffa0_0014;
const DMATCR1: u32 = 0xffa0_0018;
const CHCR1: u32 = 0xffa0_001c;
const DMAOR: u32 = 0xffa0_0040;
const IPRC: u32 = 0xffd0_000c;

#[derive(Default)]
struct Board {
    ready: Vec<(usize, u32)>,
}

impl Sh4Devices for Board {
    fn dma_ready(&mut self, channel: usize, mode: u32) {
        self.ready.push((channel, mode));
    }
}

fn fill(ram: &mut SystemRam, base: u32, words: u32) {
    for i in 0..words {
        ram.write_32(base + i * 4, 0xc0de_0000 | i);
    }
}

#[test]
fn burst_transfer_round_trip() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut scheduler = Scheduler::new();
    let mut ram = SystemRam::new(0x10000);
    fill(&mut ram, 0x0c00_1000, 8);

    let mut devices = NullDevices;
    let mut context = Context::new(&mut scheduler, &mut ram, &mut devices);
    let mut sh4 = Sh4::new(Sh4Config::default()).unwrap();

    sh4.write_32(SAR0, 0x0c00_1000, &mut context);
    sh4.write_32(DAR0, 0x0c00_2000, &mut context);
    sh4.write_32(DMATCR0, 8, &mut context);
    sh4.write_32(DMAOR, 1, &mut context);
    // longwords, both incrementing, auto request, interrupt enabled
    sh4.write_32(CHCR0, 0x5435, &mut context);

    assert!(sh4.dmac.is_active(0));
    assert_eq!(
        context.scheduler.remaining(SH4EventData::DmaComplete { channel: 0 }),
        Some(17)
    );

    context.scheduler.add_cycles(17);
    sh4.process_events(&mut context);

    assert!(!sh4.dmac.is_active(0));
    assert_eq!(sh4.read_32(DMATCR0, &mut context), 0);
    assert_ne!(sh4.read_32(CHCR0, &mut context) & CHCR_TE, 0);
    assert!(sh4.intc.is_requesting(ExceptionSource::DMTE0));

    // unmask DMTE and let the core take it
    sh4.write_16(IPRC, 0x0500, &mut context);
    sh4.cpu.set_sr(0);
    sh4.intc.recompute(0);
    assert!(sh4.instruction_boundary(&mut context));
    assert_eq!(sh4.registers.get(regs::INTEVT), 0x640);
    assert!(!sh4.intc.is_requesting(ExceptionSource::DMTE0));

    drop(context);
    for i in 0..8 {
        assert_eq!(ram.read_32(0x0c00_2000 + i * 4), 0xc0de_0000 | i);
    }
}

#[test]
fn invalid_increment_leaves_the_channel_untouched() {
    let mut scheduler = Scheduler::new();
    let mut ram = SystemRam::new(0x10000);
    fill(&mut ram, 0x0c00_1000, 4);

    let mut devices = NullDevices;
    let mut context = Context::new(&mut scheduler, &mut ram, &mut devices);
    let mut sh4 = Sh4::new(Sh4Config::default()).unwrap();

    sh4.write_32(SAR1, 0x0c00_1010, &mut context);
    sh4.write_32(DAR1, 0x0c00_2010, &mut context);
    sh4.write_32(DMATCR1, 4, &mut context);
    sh4.write_32(DMAOR, 1, &mut context);
    // source and destination mode 3 are reserved
    sh4.write_32(CHCR1, 0xf435, &mut context);

    assert!(!sh4.dmac.is_active(1));
    assert!(!context.scheduler.is_scheduled(SH4EventData::DmaComplete { channel: 1 }));
    assert_eq!(sh4.read_32(SAR1, &mut context), 0x0c00_1010);
    assert_eq!(sh4.read_32(DAR1, &mut context), 0x0c00_2010);
    assert_eq!(sh4.read_32(DMATCR1, &mut context), 4);
    assert_eq!(sh4.read_32(CHCR1, &mut context), 0xf435);

    drop(context);
    assert_eq!(ram.read_32(0x0c00_2010), 0);
}

#[test]
fn device_paced_transfer_completes_after_one_pump() {
    let mut scheduler = Scheduler::new();
    let mut ram = SystemRam::new(0x10000);
    fill(&mut ram, 0x0c00_3000, 16);
    let mut board = Board::default();
    let mut sh4 = Sh4::new(Sh4Config::default()).unwrap();
    let mut buffer = [0u8; 64];

    {
        let mut context = Context::new(&mut scheduler, &mut ram, &mut board);
        sh4.write_32(SAR0, 0x0c00_3000, &mut context);
        sh4.write_32(DMATCR0, 16, &mut context);
        sh4.write_32(DMAOR, 1, &mut context);
        // longwords, source incrementing, memory to device, interrupt enabled
        sh4.write_32(CHCR0, 0x1235, &mut context);
    }
    assert_eq!(board.ready, vec![(0, 2)]);

    let mut context = Context::new(&mut scheduler, &mut ram, &mut board);
    let status = sh4.dma_data(0, &mut buffer, &mut context);
    assert_eq!(status, DmaDataStatus::Complete);
    assert_eq!(sh4.dma_data(0, &mut buffer, &mut context), DmaDataStatus::Complete);

    sh4.process_events(&mut context);
    assert!(sh4.intc.is_requesting(ExceptionSource::DMTE0));
    assert_eq!(
        sh4.dma_data(0, &mut buffer, &mut context),
        DmaDataStatus::NotActive
    );
    assert_eq!(sh4.dma_data(7, &mut buffer, &mut context), DmaDataStatus::NotActive);

    for (i, word) in buffer.chunks_exact(4).enumerate() {
        let value = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
        assert_eq!(value, 0xc0de_0000 | i as u32);
    }
}

#[test]
fn nmi_cancels_in_flight_transfers() {
    let mut scheduler = Scheduler::new();
    let mut ram = SystemRam::new(0x10000);
    let mut devices = NullDevices;
    let mut context = Context::new(&mut scheduler, &mut ram, &mut devices);
    let mut sh4 = Sh4::new(Sh4Config::default()).unwrap();

    sh4.write_32(SAR1, 0x0c00_1000, &mut context);
    sh4.write_32(DAR1, 0x0c00_8000, &mut context);
    sh4.write_32(DMATCR1, 0x100, &mut context);
    sh4.write_32(DMAOR, 1, &mut context);
    sh4.write_32(CHCR1, 0x5435, &mut context);
    assert!(sh4.dmac.is_active(1));

    sh4.set_irq_line(InterruptLine::Nmi, LineState::Assert, &mut context);

    assert!(!sh4.dmac.is_active(1));
    assert!(!context.scheduler.is_scheduled(SH4EventData::DmaComplete { channel: 1 }));
    assert_ne!(sh4.read_32(DMAOR, &mut context) & DMAOR_NMIF, 0);
    assert!(sh4.intc.is_requesting(ExceptionSource::NMI));

    // a latched NMIF keeps every channel idle
    sh4.write_32(CHCR1, 0x5434, &mut context);
    sh4.write_32(CHCR1, 0x5435, &mut context);
    assert!(!sh4.dmac.is_active(1));
}

#[test]
fn ddt_copies_through_the_channel_registers() {
    let mut scheduler = Scheduler::new();
    let mut ram = SystemRam::new(0x10000);
    fill(&mut ram, 0x0c00_4000, 8);
    let mut devices = NullDevices;
    let mut context = Context::new(&mut scheduler, &mut ram, &mut devices);
    let mut sh4 = Sh4::new(Sh4Config::default()).unwrap();

    sh4.write_32(DMATCR1, 8, &mut context);
    // longwords, source incrementing, channel left disabled
    sh4.write_32(CHCR1, 0x1030, &mut context);

    let mut empty: [u8; 0] = [];
    let mut request = DdtTransfer {
        channel: 1,
        // write SAR and DAR, destination incrementing
        mode: DdtMode::Channel { flags: 0x1a },
        direction: 0,
        source: 0x0c00_4000,
        destination: 0x0c00_5000,
        length: 8,
        size: 4,
        buffer: &mut empty,
    };
    sh4.dma_ddt(&mut request, &mut context).unwrap();

    assert_eq!(request.destination, 0x0c00_5020);
    assert_eq!(sh4.read_32(SAR1, &mut context), 0x0c00_4000);
    assert!(!sh4.dmac.is_active(1));
    assert!(!context.scheduler.is_scheduled(SH4EventData::DmaComplete { channel: 1 }));

    assert_eq!(context.bus.read_32(0x0c00_501c), 0xc0de_0007);
}

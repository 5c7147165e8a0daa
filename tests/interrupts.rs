use onyx::{
    hw::sh4::{
        cpu::{CpuState, SR_BL, SR_MD, SR_RB},
        regs,
    },
    Context, ExceptionSource, InterruptLine, LineState, Scheduler, Sh4, Sh4Config, Sh4Devices,
    SystemRam,
};

const ICR: u32 = 0xffd0_0000;
const IPRA: u32 = 0xffd0_0004;

#[derive(Default)]
struct Board {
    acks: Vec<InterruptLine>,
}

impl Sh4Devices for Board {
    fn irq_acknowledge(&mut self, line: InterruptLine) -> u32 {
        self.acks.push(line);
        0
    }
}

fn sleeping_core() -> Sh4 {
    let mut sh4 = Sh4::new(Sh4Config::default()).unwrap();
    sh4.cpu.set_sr(0); // bank 0, unblocked, mask 0
    sh4.cpu.registers.vbr = 0x8c00_0000;
    sh4.cpu.registers.current_pc = 0x8c00_8000;
    sh4.cpu.sleep();
    sh4
}

#[test]
fn encoded_level_wakes_the_core() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut scheduler = Scheduler::new();
    let mut ram = SystemRam::new(0x1000);
    let mut board = Board::default();
    let mut sh4 = sleeping_core();
    for i in 0..8 {
        sh4.cpu.registers.r[i] = i as u32;
        sh4.cpu.registers.r_bank[1][i] = 0x100 + i as u32;
    }

    {
        let mut context = Context::new(&mut scheduler, &mut ram, &mut board);
        sh4.set_irln_input(5, &mut context);
    }

    assert_eq!(board.acks, vec![InterruptLine::Irln]);
    assert_eq!(sh4.registers.get(regs::INTEVT), 0x2a0);
    assert_eq!(sh4.cpu.state, CpuState::WakePending);

    let registers = &sh4.cpu.registers;
    assert_eq!(registers.current_pc, 0x8c00_0600);
    assert_eq!(registers.spc, 0x8c00_8000);
    assert_eq!(registers.ssr, 0);
    assert_eq!(registers.sr, (1 << SR_MD) | (1 << SR_RB) | (1 << SR_BL));
    assert_eq!(registers.r[3], 0x103);
    assert_eq!(registers.r_bank[0][3], 3);

    // level sources stay up until the board lowers the level
    assert!(sh4.intc.is_requesting(ExceptionSource::IRLn5));

    let mut context = Context::new(&mut scheduler, &mut ram, &mut board);
    sh4.set_irln_input(15, &mut context);
    assert_eq!(sh4.intc.pending_count(), 0);
}

#[test]
fn unchanged_level_is_not_seen() {
    let mut scheduler = Scheduler::new();
    let mut ram = SystemRam::new(0x1000);
    let mut board = Board::default();
    let mut sh4 = Sh4::new(Sh4Config::default()).unwrap();

    let mut context = Context::new(&mut scheduler, &mut ram, &mut board);
    sh4.set_irln_input(15, &mut context);
    assert_eq!(sh4.intc.recompute_count, 0);

    sh4.set_irln_input(3, &mut context);
    let after_first = sh4.intc.recompute_count;
    sh4.set_irln_input(3, &mut context);
    assert_eq!(sh4.intc.recompute_count, after_first);
    assert!(sh4.intc.is_requesting(ExceptionSource::IRLn3));
}

#[test]
fn discrete_lines_dispatch_by_priority() {
    let mut scheduler = Scheduler::new();
    let mut ram = SystemRam::new(0x1000);
    let mut board = Board::default();
    let mut sh4 = sleeping_core();
    // mask 8 keeps IRL1 (10) and IRL0 (13) eligible
    sh4.cpu.set_sr(0x80);

    {
        let mut context = Context::new(&mut scheduler, &mut ram, &mut board);
        sh4.write_16(ICR, 0x0080, &mut context);

        sh4.cpu.set_sr(0x80 | (1 << SR_BL));
        sh4.set_irq_line(InterruptLine::Irl1, LineState::Assert, &mut context);
        sh4.set_irq_line(InterruptLine::Irl0, LineState::Assert, &mut context);
        sh4.set_irq_line(InterruptLine::Irl3, LineState::Assert, &mut context);
        assert_eq!(sh4.intc.pending_count(), 3);
        assert!(!sh4.intc.test_irq);

        sh4.cpu.set_sr(0x80);
        sh4.intc.recompute(0x80);
        assert!(sh4.instruction_boundary(&mut context));
    }

    assert_eq!(board.acks, vec![InterruptLine::Irl0]);
    assert_eq!(sh4.registers.get(regs::INTEVT), 0x240);
}

#[test]
fn delay_slot_postpones_dispatch() {
    let mut scheduler = Scheduler::new();
    let mut ram = SystemRam::new(0x1000);
    let mut board = Board::default();
    let mut sh4 = sleeping_core();
    let mut context = Context::new(&mut scheduler, &mut ram, &mut board);

    sh4.write_16(IPRA, 0x0f00, &mut context); // TUNI1
    sh4.cpu.in_delay_slot = true;
    sh4.request(ExceptionSource::TUNI1);
    assert!(sh4.intc.test_irq);
    assert!(!sh4.instruction_boundary(&mut context));

    sh4.cpu.in_delay_slot = false;
    assert!(sh4.instruction_boundary(&mut context));
    assert_eq!(sh4.registers.get(regs::INTEVT), 0x420);
}

#[test]
fn nmi_edge_follows_icr() {
    let mut scheduler = Scheduler::new();
    let mut ram = SystemRam::new(0x1000);
    let mut board = Board::default();
    let mut sh4 = Sh4::new(Sh4Config::default()).unwrap();
    let mut context = Context::new(&mut scheduler, &mut ram, &mut board);

    // rising edge selected: asserting alone does nothing
    sh4.write_16(ICR, 0x0100, &mut context);
    sh4.set_irq_line(InterruptLine::Nmi, LineState::Assert, &mut context);
    assert!(!sh4.intc.is_requesting(ExceptionSource::NMI));
    assert_eq!(sh4.read_16(ICR, &mut context), 0x8100);

    sh4.set_irq_line(InterruptLine::Nmi, LineState::Clear, &mut context);
    assert!(sh4.intc.is_requesting(ExceptionSource::NMI));
    assert_eq!(sh4.read_16(ICR, &mut context), 0x0100);
}

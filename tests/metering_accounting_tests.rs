mod common;

use common::{charged_amounts, static_method};
use tolin::classfile::{ArithOp, ClassFile, Insn, InvokeKind, SlotType};
use tolin::config::GasCostModel;
use tolin::instrument::instrument_class;
use tolin::verification::{ClassTags, VerifiedClass};

fn accounting_model() -> GasCostModel {
    GasCostModel {
        cpu_instruction: 0,
        cpu_arithmetic: 3,
        cpu_field_access: 5,
        cpu_invoke: 7,
        cpu_select: 11,
        ram_activation_record: 13,
        ram_activation_slot: 2,
        ..Default::default()
    }
}

// Exact accounting: a body with N arithmetic instructions, M field accesses
// and K invocations is charged N·cpuArith + M·cpuField + K·cpuInvoke.
#[test]
fn charged_cpu_equals_category_sum() {
    let mut class = ClassFile::new("test/M", "java/lang/Object");
    let counter = class.pool.field_ref("test/Helper", "COUNT", "I").expect("field ref");
    let helper = class.pool.method_ref("test/Helper", "tick", "()V").expect("method ref");
    static_method(
        &mut class,
        "run",
        "()V",
        vec![
            Insn::Iconst(1),
            Insn::Iconst(2),
            Insn::Arith(SlotType::Int, ArithOp::Add),
            Insn::Iconst(3),
            Insn::Arith(SlotType::Int, ArithOp::Mul),
            Insn::Iconst(4),
            Insn::Arith(SlotType::Int, ArithOp::Sub),
            Insn::Pop,
            Insn::GetStatic(counter),
            Insn::Pop,
            Insn::GetStatic(counter),
            Insn::Pop,
            Insn::Invoke(InvokeKind::Static, helper),
            Insn::Return(None),
        ],
    );
    let gas = accounting_model();
    let result =
        instrument_class(VerifiedClass::new(class, ClassTags::default()), &gas).expect("instrumentation");

    let code = result.class().methods[0].code.as_ref().expect("body");
    let (cpu, ram) = charged_amounts(result.class(), code);
    assert_eq!(cpu, 3 * gas.cpu_arithmetic + 2 * gas.cpu_field_access + gas.cpu_invoke);
    // one activation record, no argument slots
    assert_eq!(ram, gas.ram_activation_record);
}

// Argument slots scale the activation charge; the receiver counts as a slot.
#[test]
fn activation_charge_scales_with_argument_slots() {
    let mut class = ClassFile::new("test/M", "java/lang/Object");
    let target = class.pool.method_ref("test/Helper", "mix", "(JI)I").expect("method ref");
    static_method(
        &mut class,
        "run",
        "(Ltest/Helper;)I",
        vec![
            Insn::Load(SlotType::Ref, 0),
            Insn::Lconst(1),
            Insn::Iconst(2),
            Insn::Invoke(InvokeKind::Virtual, target),
            Insn::Return(Some(SlotType::Int)),
        ],
    );
    let gas = accounting_model();
    let result =
        instrument_class(VerifiedClass::new(class, ClassTags::default()), &gas).expect("instrumentation");

    let code = result.class().methods[0].code.as_ref().expect("body");
    let (_, ram) = charged_amounts(result.class(), code);
    // receiver + long + int = 4 slots
    assert_eq!(ram, gas.ram_activation_record + 4 * gas.ram_activation_slot);
}

// Every path into a branch target pays the block's charge: the charge sits
// after the leader label, and both blocks of a conditional are charged.
#[test]
fn branch_targets_pay_their_block() {
    let mut class = ClassFile::new("test/M", "java/lang/Object");
    static_method(
        &mut class,
        "pick",
        "(I)I",
        vec![
            Insn::Load(SlotType::Int, 0),
            Insn::If(tolin::classfile::IfCond::Eq, 1),
            Insn::Iconst(10),
            Insn::Return(Some(SlotType::Int)),
            Insn::Label(1),
            Insn::Iconst(20),
            Insn::Return(Some(SlotType::Int)),
        ],
    );
    let gas = accounting_model();
    let result =
        instrument_class(VerifiedClass::new(class, ClassTags::default()), &gas).expect("instrumentation");

    let code = result.class().methods[0].code.as_ref().expect("body");
    let (cpu, _) = charged_amounts(result.class(), code);
    // entry block pays the branch, each arm pays nothing else under this model
    assert_eq!(cpu, gas.cpu_select);
    // the taken path's charge would sit after the label, never before it
    let label_at = code.insns.iter().position(|i| *i == Insn::Label(1)).expect("label");
    assert!(!matches!(code.insns[label_at.saturating_sub(1)], Insn::Invoke(..)));
}

// Synthesized members are metering machinery and are never metered
// themselves.
#[test]
fn synthesized_members_are_not_metered() {
    let mut class = ClassFile::new("test/M", "java/lang/Object");
    static_method(
        &mut class,
        "make",
        "()[I",
        vec![Insn::Iconst(8), Insn::NewArray(10), Insn::Return(Some(SlotType::Ref))],
    );
    let gas = accounting_model();
    let result =
        instrument_class(VerifiedClass::new(class, ClassTags::default()), &gas).expect("instrumentation");

    let allocator = result
        .class()
        .methods
        .iter()
        .find(|m| m.name.starts_with("§alloc"))
        .expect("allocator");
    let (cpu, _) = charged_amounts(result.class(), allocator.code.as_ref().expect("body"));
    assert_eq!(cpu, 0);
}

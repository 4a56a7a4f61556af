//! Structured method bodies.
//!
//! Instruction lists use label pseudo-instructions as branch targets, so that
//! passes can insert, replace and remove instructions without invalidating
//! branches. Labels are resolved to byte offsets only when the class is
//! serialized.

use super::descriptor::JvmType;

/// A branch target inside one method body.
pub type Label = u16;

/// The computational type of a value on the operand stack or in a local slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotType {
    Int,
    Long,
    Float,
    Double,
    Ref,
}

impl SlotType {
    /// The slot type used to move values of the given declared type.
    pub fn of(ty: &JvmType) -> Self {
        match ty {
            JvmType::Long => SlotType::Long,
            JvmType::Float => SlotType::Float,
            JvmType::Double => SlotType::Double,
            JvmType::Object(_) | JvmType::Array(_) => SlotType::Ref,
            _ => SlotType::Int,
        }
    }

    pub fn size(self) -> u16 {
        match self {
            SlotType::Long | SlotType::Double => 2,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Neg,
    Shl,
    Shr,
    Ushr,
    And,
    Or,
    Xor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpKind {
    LCmp,
    FCmpL,
    FCmpG,
    DCmpL,
    DCmpG,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IfCond {
    Eq,
    Ne,
    Lt,
    Ge,
    Gt,
    Le,
    ICmpEq,
    ICmpNe,
    ICmpLt,
    ICmpGe,
    ICmpGt,
    ICmpLe,
    ACmpEq,
    ACmpNe,
    Null,
    NonNull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvokeKind {
    Virtual,
    Special,
    Static,
    Interface,
}

impl InvokeKind {
    /// True if the invocation takes an implicit receiver.
    pub fn has_receiver(self) -> bool {
        !matches!(self, InvokeKind::Static)
    }
}

/// The gas category of an instruction, keying its CPU cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GasCategory {
    Arithmetic,
    ArrayAccess,
    FieldAccess,
    Invoke,
    Allocation,
    Select,
    Instruction,
}

/// One instruction of a method body. Pool operands are constant pool indices.
#[derive(Debug, Clone, PartialEq)]
pub enum Insn {
    /// Pseudo-instruction marking a branch target; emits no bytes.
    Label(Label),
    Nop,
    AconstNull,
    Iconst(i32),
    Lconst(i64),
    Fconst(f32),
    Dconst(f64),
    /// Loads the constant at the given pool index (String, Class, Integer,
    /// Float, Long or Double).
    Ldc(u16),
    Load(SlotType, u16),
    Store(SlotType, u16),
    Iinc(u16, i16),
    ArrayLoad(SlotType),
    ArrayStore(SlotType),
    Pop,
    Pop2,
    Dup,
    DupX1,
    Dup2,
    Swap,
    Arith(SlotType, ArithOp),
    /// Numeric conversion from the first type to the second.
    Convert(SlotType, SlotType),
    Cmp(CmpKind),
    If(IfCond, Label),
    Goto(Label),
    Switch { default: Label, cases: Vec<(i32, Label)> },
    /// Return; `None` for `return` of a void method.
    Return(Option<SlotType>),
    GetStatic(u16),
    PutStatic(u16),
    GetField(u16),
    PutField(u16),
    /// Invocation of the method reference at the given pool index.
    Invoke(InvokeKind, u16),
    /// Invocation through the InvokeDynamic pool entry at the given index.
    InvokeDynamic(u16),
    /// Allocation of an instance of the class at the given pool index.
    New(u16),
    /// Allocation of a primitive array with the given `atype` operand.
    NewArray(u8),
    /// Allocation of a reference array with the given element class pool index.
    ANewArray(u16),
    /// Allocation of the array class at the given pool index, creating the
    /// given number of dimensions.
    MultiANewArray(u16, u8),
    ArrayLength,
    Checkcast(u16),
    InstanceOf(u16),
    Athrow,
    MonitorEnter,
    MonitorExit,
}

impl Insn {
    /// The gas category of this instruction.
    pub fn gas_category(&self) -> GasCategory {
        match self {
            Insn::Arith(..) => GasCategory::Arithmetic,
            Insn::ArrayLoad(_) | Insn::ArrayStore(_) => GasCategory::ArrayAccess,
            Insn::GetStatic(_) | Insn::PutStatic(_) | Insn::GetField(_) | Insn::PutField(_) => {
                GasCategory::FieldAccess
            }
            Insn::Invoke(..) | Insn::InvokeDynamic(_) => GasCategory::Invoke,
            Insn::New(_) | Insn::NewArray(_) | Insn::ANewArray(_) | Insn::MultiANewArray(..) => {
                GasCategory::Allocation
            }
            Insn::Cmp(_) | Insn::If(..) | Insn::Goto(_) | Insn::Switch { .. } => GasCategory::Select,
            _ => GasCategory::Instruction,
        }
    }

    /// True if control never falls through to the next instruction.
    pub fn ends_block(&self) -> bool {
        matches!(
            self,
            Insn::If(..) | Insn::Goto(_) | Insn::Switch { .. } | Insn::Return(_) | Insn::Athrow
        )
    }

    /// True for the pseudo-instructions that emit no bytes.
    pub fn is_label(&self) -> bool {
        matches!(self, Insn::Label(_))
    }

    /// The labels this instruction may branch to.
    pub fn targets(&self) -> Vec<Label> {
        match self {
            Insn::If(_, target) | Insn::Goto(target) => vec![*target],
            Insn::Switch { default, cases } => {
                let mut targets = vec![*default];
                targets.extend(cases.iter().map(|(_, target)| *target));
                targets
            }
            _ => Vec::new(),
        }
    }

    /// A typed load of the given declared type from the given local slot.
    pub fn load(ty: &JvmType, index: u16) -> Self {
        Insn::Load(SlotType::of(ty), index)
    }

    /// A typed store of the given declared type into the given local slot.
    pub fn store(ty: &JvmType, index: u16) -> Self {
        Insn::Store(SlotType::of(ty), index)
    }

    /// A typed return for the given declared type.
    pub fn ret(ty: &JvmType) -> Self {
        match ty {
            JvmType::Void => Insn::Return(None),
            other => Insn::Return(Some(SlotType::of(other))),
        }
    }
}

/// The array-class descriptor for a `newarray` atype operand (JVMS 6.5).
pub fn primitive_array_descriptor(atype: u8) -> Option<&'static str> {
    Some(match atype {
        4 => "[Z",
        5 => "[C",
        6 => "[F",
        7 => "[D",
        8 => "[B",
        9 => "[S",
        10 => "[I",
        11 => "[J",
        _ => return None,
    })
}

/// An entry of the exception handler table of a method body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionHandler {
    pub start: Label,
    pub end: Label,
    pub handler: Label,
    /// Pool index of the caught class; `None` catches everything.
    pub catch_type: Option<u16>,
}

/// A local variable debug entry covering the whole body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVariable {
    pub name: String,
    pub descriptor: String,
    pub slot: u16,
}

/// The body of a non-abstract method.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Code {
    pub insns: Vec<Insn>,
    pub handlers: Vec<ExceptionHandler>,
    /// Debug tables; dropped by the assembler before serialization since the
    /// rewriting passes leave them stale.
    pub line_numbers: Vec<(Label, u16)>,
    pub local_variables: Vec<LocalVariable>,
    next_label: Label,
}

impl Code {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh label, distinct from every label already used in this body.
    pub fn fresh_label(&mut self) -> Label {
        // bodies built elsewhere may already use labels: stay above them
        for insn in &self.insns {
            if let Insn::Label(l) = insn {
                if *l >= self.next_label {
                    self.next_label = *l + 1;
                }
            }
        }
        let label = self.next_label;
        self.next_label += 1;
        label
    }

    /// Appends an instruction.
    pub fn push(&mut self, insn: Insn) {
        self.insns.push(insn);
    }

    /// Appends several instructions.
    pub fn extend(&mut self, insns: impl IntoIterator<Item = Insn>) {
        self.insns.extend(insns);
    }

    /// Shifts every local variable reference up by the given amount. Applied
    /// as an atomic step when a static method becomes an instance method, to
    /// make room for the implicit receiver in slot 0.
    pub fn shift_locals(&mut self, by: u16) {
        for insn in &mut self.insns {
            match insn {
                Insn::Load(_, index) | Insn::Store(_, index) | Insn::Iinc(index, _) => *index += by,
                _ => {}
            }
        }
        for var in &mut self.local_variables {
            var.slot += by;
        }
    }

    /// The labels that are actually referenced by branches or handlers, in
    /// other words the places where a stack map frame will be required.
    pub fn referenced_labels(&self) -> std::collections::BTreeSet<Label> {
        let mut referenced = std::collections::BTreeSet::new();
        for insn in &self.insns {
            referenced.extend(insn.targets());
        }
        for handler in &self.handlers {
            referenced.insert(handler.handler);
        }
        referenced
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shift_locals() {
        let mut code = Code::new();
        code.extend([
            Insn::Load(SlotType::Int, 0),
            Insn::Iinc(1, 3),
            Insn::Store(SlotType::Ref, 2),
            Insn::Return(None),
        ]);
        code.shift_locals(1);
        assert_eq!(
            code.insns,
            vec![
                Insn::Load(SlotType::Int, 1),
                Insn::Iinc(2, 3),
                Insn::Store(SlotType::Ref, 3),
                Insn::Return(None),
            ]
        );
    }

    #[test]
    fn test_fresh_label_skips_existing() {
        let mut code = Code::new();
        code.push(Insn::Label(5));
        assert_eq!(code.fresh_label(), 6);
        assert_eq!(code.fresh_label(), 7);
    }

    #[test]
    fn test_gas_categories() {
        assert_eq!(Insn::Arith(SlotType::Int, ArithOp::Add).gas_category(), GasCategory::Arithmetic);
        assert_eq!(Insn::GetField(1).gas_category(), GasCategory::FieldAccess);
        assert_eq!(Insn::Invoke(InvokeKind::Virtual, 1).gas_category(), GasCategory::Invoke);
        assert_eq!(Insn::New(1).gas_category(), GasCategory::Allocation);
        assert_eq!(Insn::Goto(0).gas_category(), GasCategory::Select);
        assert_eq!(Insn::Nop.gas_category(), GasCategory::Instruction);
    }

    #[test]
    fn test_referenced_labels() {
        let mut code = Code::new();
        code.extend([
            Insn::Label(0),
            Insn::If(IfCond::Eq, 2),
            Insn::Goto(0),
            Insn::Label(2),
            Insn::Return(None),
        ]);
        code.handlers.push(ExceptionHandler { start: 0, end: 2, handler: 2, catch_type: None });
        let referenced: Vec<_> = code.referenced_labels().into_iter().collect();
        assert_eq!(referenced, vec![0, 2]);
    }
}

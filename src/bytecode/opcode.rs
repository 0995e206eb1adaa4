// CyberBasic Bytecode Instructions

/// Bytecode operation codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    // Stack operations
    Push, // Push u8 immediate as an int
    Pop,
    Dup,
    Swap,

    // Variables
    LoadVar,         // Read slot (u8)
    StoreVar,        // Write slot (u8)
    LoadGlobal,      // Read global by name constant
    StoreGlobal,     // Write global by name constant
    LoadEntityProp,  // entity.prop read (u8 entity, u8 prop)
    StoreEntityProp, // entity.prop write (u8 entity, u8 prop)

    // Literals
    LoadConst,
    LoadString,

    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Power,  // a ^ b
    IntDiv, // a \ b
    Neg,

    // Comparison
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,

    // Logical
    And,
    Or,
    Xor,
    Not,

    // Control flow (i16 relative offsets)
    Jump,
    JumpIfFalse,
    JumpIfTrue,

    // Subroutines
    CallUser, // u8 name constant, u8 argc
    Return,
    ReturnVal,

    // Host bridge
    CallForeign,   // u8 name constant, u8 argc
    RegisterEvent, // u8 event constant, u8 key constant, u16 handler offset

    // Fibers
    StartCoroutine, // u16 absolute target
    Yield,
    WaitSeconds,

    // Arrays
    CreateArray, // u8 ndims, ndims x u8 dim constant, u8 slot
    LoadArray,   // u8 slot
    StoreArray,  // u8 slot

    // Runtime helpers
    Print,
    Str,
    Int,
    Random,
    RandomN,
    Sleep,
    Timer,
    ResetTimer,

    // Math
    Sin,
    Cos,
    Tan,
    Sqrt,
    Abs,
    Lerp,
    Noise2D,
    Floor,
    Ceil,
    Round,
    Min,
    Max,
    Clamp,
    Pow,
    Exp,
    Log,
    Log10,
    Atan2,
    Sign,
    Deg2Rad,
    Rad2Deg,
    Distance2D,
    Distance3D,
    DistSq2D,
    DistSq3D,
    InRadius2D,
    InRadius3D,
    Angle2D,
    MatMul, // u8 result, u8 a, u8 b name constants

    // Strings
    LeftStr,
    RightStr,
    MidStr,
    LenStr,

    // File handles
    OpenFile,
    ReadLine,
    WriteLine,
    CloseFile,
    Eof,

    // Legacy game runtime
    LoadImage,
    CreateSprite,
    SetSpritePosition,
    DrawSprite,
    LoadModel,
    CreateCamera,
    SetCameraPosition,
    DrawModel,
    PlayMusic,
    PlaySound,
    LoadSound,
    CreatePhysicsBody,
    SetVelocity,
    ApplyForce,
    RayCast3D,
    InitGraphics,
    Sync,
    ShouldClose,

    // Termination
    Quit,
    Halt,
}

impl OpCode {
    /// Decode an opcode byte, rejecting values past the last variant
    pub fn from_byte(byte: u8) -> Option<Self> {
        if byte <= OpCode::Halt as u8 {
            // SAFETY: `OpCode` is `repr(u8)` with contiguous discriminants 0..=Halt
            Some(unsafe { std::mem::transmute::<u8, OpCode>(byte) })
        } else {
            None
        }
    }

    /// Number of operand bytes following the opcode.
    /// `CreateArray` is variable-length; this returns its minimum (the
    /// dimension count plus the slot), see `Chunk::instruction_len`.
    pub fn operand_count(&self) -> usize {
        match self {
            OpCode::Push
            | OpCode::LoadVar
            | OpCode::StoreVar
            | OpCode::LoadGlobal
            | OpCode::StoreGlobal
            | OpCode::LoadConst
            | OpCode::LoadString
            | OpCode::LoadArray
            | OpCode::StoreArray => 1,

            OpCode::LoadEntityProp
            | OpCode::StoreEntityProp
            | OpCode::Jump
            | OpCode::JumpIfFalse
            | OpCode::JumpIfTrue
            | OpCode::CallUser
            | OpCode::CallForeign
            | OpCode::StartCoroutine
            | OpCode::CreateArray => 2,

            OpCode::MatMul => 3,
            OpCode::RegisterEvent => 4,

            _ => 0,
        }
    }

    /// Lowercase mnemonic used by the disassembler
    pub fn mnemonic(&self) -> String {
        let name = format!("{:?}", self);
        let mut out = String::with_capacity(name.len() + 4);
        let mut prev_lower = false;
        for c in name.chars() {
            if c.is_ascii_uppercase() && prev_lower {
                out.push('_');
            }
            prev_lower = c.is_ascii_lowercase();
            out.push(c.to_ascii_lowercase());
        }
        out
    }

    pub fn is_jump(&self) -> bool {
        matches!(self, OpCode::Jump | OpCode::JumpIfFalse | OpCode::JumpIfTrue)
    }
}

impl TryFrom<u8> for OpCode {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        OpCode::from_byte(byte).ok_or(byte)
    }
}

impl From<OpCode> for u8 {
    fn from(op: OpCode) -> Self {
        op as u8
    }
}

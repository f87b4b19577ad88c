use crate::instruction::Instruction;

/// Index of a warrior within a battle.
pub type WarriorId = usize;

/// The circular memory shared by every warrior in one battle.
///
/// All addresses wrap modulo the core size; there is no way to address a
/// cell outside the core. Field values of stored instructions are kept in
/// `0..len()`.
#[derive(Clone, Debug)]
pub struct Core {
    cells: Box<[Instruction]>,
    /// Last warrior to write each cell, if any.
    owners: Box<[Option<WarriorId>]>,
    /// Per-warrior count of writes made while executing.
    writes: Vec<u64>,
    /// Per-warrior map of cells executed or written.
    accessed: Vec<Vec<bool>>,
    read_limit: usize,
    write_limit: usize,
}

impl Core {
    /// Create a core of `size` cells, each holding `DAT.F $0, $0`.
    ///
    /// Panics if `size` is zero; battle configuration rejects that earlier.
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "core size must be positive");
        Self {
            cells: vec![Instruction::default(); size].into_boxed_slice(),
            owners: vec![None; size].into_boxed_slice(),
            writes: Vec::new(),
            accessed: Vec::new(),
            read_limit: size,
            write_limit: size,
        }
    }

    /// Restrict how far an instruction may read and write relative to itself.
    ///
    /// Limits are clamped into `1..=len()`. A limit equal to the core size
    /// disables folding.
    pub fn with_limits(mut self, read_limit: usize, write_limit: usize) -> Self {
        let size = self.len();
        self.read_limit = read_limit.clamp(1, size);
        self.write_limit = write_limit.clamp(1, size);
        self
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Reduce any signed value into `0..len()`.
    #[inline(always)]
    pub fn normalize(&self, value: i64) -> usize {
        value.rem_euclid(self.cells.len() as i64) as usize
    }

    /// Normalize both field values of an instruction.
    pub fn normalize_instruction(&self, mut ins: Instruction) -> Instruction {
        ins.a_value = self.normalize(ins.a_value) as i64;
        ins.b_value = self.normalize(ins.b_value) as i64;
        ins
    }

    /// Fold a normalized offset into the read window.
    #[inline(always)]
    pub fn fold_read(&self, offset: usize) -> usize {
        fold(offset, self.read_limit, self.len())
    }

    /// Fold a normalized offset into the write window.
    #[inline(always)]
    pub fn fold_write(&self, offset: usize) -> usize {
        fold(offset, self.write_limit, self.len())
    }

    #[inline(always)]
    pub fn read(&self, addr: i64) -> Instruction {
        self.cells[self.normalize(addr)]
    }

    /// Store an instruction, normalizing its fields on the way in.
    pub fn write(&mut self, addr: i64, ins: Instruction) {
        let idx = self.normalize(addr);
        self.cells[idx] = self.normalize_instruction(ins);
    }

    /// Store an instruction on behalf of an executing warrior.
    pub fn write_by(&mut self, addr: i64, ins: Instruction, warrior: WarriorId) {
        let idx = self.normalize(addr);
        self.cells[idx] = self.normalize_instruction(ins);
        self.owners[idx] = Some(warrior);
        if self.writes.len() <= warrior {
            self.writes.resize(warrior + 1, 0);
        }
        self.writes[warrior] += 1;
        self.mark_accessed(idx, warrior);
    }

    /// Record that `warrior` executed the instruction at `addr`.
    pub fn touch(&mut self, addr: i64, warrior: WarriorId) {
        let idx = self.normalize(addr);
        self.mark_accessed(idx, warrior);
    }

    fn mark_accessed(&mut self, idx: usize, warrior: WarriorId) {
        if self.accessed.len() <= warrior {
            let size = self.cells.len();
            self.accessed.resize_with(warrior + 1, || vec![false; size]);
        }
        self.accessed[warrior][idx] = true;
    }

    /// Distinct cells `warrior` has executed or written.
    pub fn accessed_cells(&self, warrior: WarriorId) -> usize {
        self.accessed
            .get(warrior)
            .map_or(0, |cells| cells.iter().filter(|&&hit| hit).count())
    }

    /// Fraction of the core `warrior` has executed or written.
    pub fn coverage(&self, warrior: WarriorId) -> f64 {
        self.accessed_cells(warrior) as f64 / self.len() as f64
    }

    /// Copy a compiled program into the core starting at `offset`.
    ///
    /// Loading marks ownership but does not count as execution writes.
    pub fn load(&mut self, offset: usize, program: &[Instruction], warrior: WarriorId) {
        for (i, &ins) in program.iter().enumerate() {
            let idx = self.normalize((offset + i) as i64);
            self.cells[idx] = self.normalize_instruction(ins);
            self.owners[idx] = Some(warrior);
        }
    }

    pub fn owner(&self, addr: i64) -> Option<WarriorId> {
        self.owners[self.normalize(addr)]
    }

    /// Number of cells whose last writer was `warrior`.
    pub fn owned_cells(&self, warrior: WarriorId) -> usize {
        self.owners.iter().filter(|&&o| o == Some(warrior)).count()
    }

    /// Writes made by `warrior` while executing.
    pub fn writes_by(&self, warrior: WarriorId) -> u64 {
        self.writes.get(warrior).copied().unwrap_or(0)
    }

    pub fn cells(&self) -> &[Instruction] {
        &self.cells
    }

    /// Byte encoding of every cell, in address order.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.cells.len() * 12);
        for ins in self.cells.iter() {
            ins.encode_into(&mut out);
        }
        out
    }
}

/// ICWS-94 folding: map `offset` into a window of `limit` cells centred on
/// the executing instruction.
#[inline(always)]
fn fold(offset: usize, limit: usize, size: usize) -> usize {
    let mut r = offset % limit;
    if r > limit / 2 {
        r += size - limit;
    }
    r
}

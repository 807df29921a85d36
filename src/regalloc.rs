use crate::error::Error;
use crate::isa::{reg_name, Reg};
use crate::params::FIRST_GP_REG;
use std::collections::BTreeMap;

/// Names whose bindings are never evicted. They hold the pixel coordinates
/// inside per-pixel plot statements.
pub const PROTECTED: [&str; 2] = ["x", "y"];

/// General-purpose register pool. A register is either on the free stack or
/// in the used list; a named binding keeps its register out of the pool
/// until the binding is dropped.
pub struct RegAlloc {
    free: Vec<Reg>,
    used: Vec<Reg>,
    vars: BTreeMap<String, Reg>,
}

impl RegAlloc {
    pub fn new(num_registers: usize) -> RegAlloc {
        let mut free: Vec<Reg> = (FIRST_GP_REG..FIRST_GP_REG + num_registers).collect();
        free.reverse();
        RegAlloc {
            free,
            used: Vec::new(),
            vars: BTreeMap::new(),
        }
    }

    pub fn alloc(&mut self) -> Result<Reg, Error> {
        if let Some(reg) = self.free.pop() {
            self.used.push(reg);
            debug!("alloc {}", reg_name(reg));
            return Ok(reg);
        }
        let victim = self
            .vars
            .iter()
            .find(|&(name, _)| !PROTECTED.contains(&name.as_str()))
            .map(|(name, &reg)| (name.clone(), reg));
        match victim {
            Some((name, reg)) => {
                debug!("alloc {}: evicting ${}", reg_name(reg), name);
                self.vars.remove(&name);
                Ok(reg)
            }
            None => Err(Error::RegisterExhaustion),
        }
    }

    /// Returns `reg` to the pool unless a name is bound to it.
    pub fn free(&mut self, reg: Reg) {
        if self.vars.values().any(|&r| r == reg) {
            return;
        }
        match self.used.iter().position(|&r| r == reg) {
            Some(i) => {
                self.used.remove(i);
                self.free.push(reg);
                debug!("free {}", reg_name(reg));
            }
            None => warn!("free of {} which is not allocated", reg_name(reg)),
        }
    }

    pub fn bind(&mut self, name: &str, reg: Reg) {
        self.vars.insert(name.to_string(), reg);
    }

    pub fn lookup(&self, name: &str) -> Option<Reg> {
        self.vars.get(name).cloned()
    }

    /// Drops the binding for `name` and frees its register.
    pub fn release(&mut self, name: &str) {
        if let Some(reg) = self.vars.remove(name) {
            self.free(reg);
        }
    }

    pub fn reset(&mut self) {
        self.free.extend(self.used.drain(..));
        self.free.sort_unstable_by(|a, b| b.cmp(a));
        self.vars.clear();
    }

    #[cfg(test)]
    pub fn num_free(&self) -> usize {
        self.free.len()
    }

    #[cfg(test)]
    pub fn in_use(&self) -> &[Reg] {
        &self.used
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocates_lowest_first() {
        let mut regs = RegAlloc::new(8);
        assert_eq!(regs.alloc().unwrap(), 4);
        assert_eq!(regs.alloc().unwrap(), 5);
        regs.free(4);
        assert_eq!(regs.alloc().unwrap(), 4);
    }

    #[test]
    fn test_ninth_alloc_without_bindings_fails() {
        let mut regs = RegAlloc::new(8);
        let got: Vec<Reg> = (0..8).map(|_| regs.alloc().unwrap()).collect();
        assert_eq!(got, vec![4, 5, 6, 7, 8, 9, 10, 11]);
        match regs.alloc() {
            Err(Error::RegisterExhaustion) => (),
            other => panic!("expected exhaustion, got {:?}", other),
        }
    }

    #[test]
    fn test_ninth_alloc_evicts_binding() {
        let mut regs = RegAlloc::new(8);
        for _ in 0..8 {
            regs.alloc().unwrap();
        }
        regs.bind("%idx2", 6);
        let r = regs.alloc().unwrap();
        assert_eq!(r, 6);
        assert_eq!(regs.lookup("%idx2"), None);
    }

    #[test]
    fn test_protected_names_are_not_evicted() {
        let mut regs = RegAlloc::new(2);
        let a = regs.alloc().unwrap();
        let b = regs.alloc().unwrap();
        regs.bind("x", a);
        regs.bind("y", b);
        assert!(regs.alloc().is_err());
        assert_eq!(regs.lookup("x"), Some(a));
    }

    #[test]
    fn test_free_of_bound_register_is_noop() {
        let mut regs = RegAlloc::new(8);
        let r = regs.alloc().unwrap();
        regs.bind("x", r);
        regs.free(r);
        assert_eq!(regs.num_free(), 7);
        regs.release("x");
        assert_eq!(regs.num_free(), 8);
    }

    #[test]
    fn test_every_register_in_exactly_one_place() {
        let mut regs = RegAlloc::new(8);
        let a = regs.alloc().unwrap();
        let _b = regs.alloc().unwrap();
        regs.free(a);
        regs.free(a);
        assert_eq!(regs.num_free() + regs.in_use().len(), 8);
    }

    #[test]
    fn test_reset() {
        let mut regs = RegAlloc::new(8);
        for _ in 0..5 {
            regs.alloc().unwrap();
        }
        regs.bind("y", 7);
        regs.reset();
        assert_eq!(regs.num_free(), 8);
        assert!(regs.in_use().is_empty());
        assert_eq!(regs.lookup("y"), None);
        assert_eq!(regs.alloc().unwrap(), 4);
    }
}

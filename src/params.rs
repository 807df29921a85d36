use crate::error::Error;
use crate::isa::Reg;

// Register file
pub const REG_FILE_SIZE: usize = 32;
pub const ZERO_REG: Reg = 0;
pub const BLOCK_IDX_REG: Reg = 1;
pub const BLOCK_DIM_REG: Reg = 2;
pub const THREAD_IDX_REG: Reg = 3;
pub const FIRST_GP_REG: Reg = 4;
pub const NUM_GP_REGS: usize = 8;

// Launch geometry
pub const BLOCK_DIM: usize = 8;
pub const NUM_THREADS: usize = 16;

// Data memory, in words. Each array element takes ELEM_WORDS words.
pub const MEM_SIZE: usize = 512 * 512;
pub const ELEM_WORDS: usize = 2;
pub const HALF_BITS: u32 = 9;

// Display
pub const SCREEN_WIDTH: usize = 1280;
pub const SCREEN_HEIGHT: usize = 720;
pub const PLOT_WIDTH: usize = 512;
pub const PLOT_HEIGHT: usize = 512;
pub const SIMPLE_PLOT_WIDTH: usize = 1024;

pub const X_MAX: f64 = 5.0;
pub const X_MIN: f64 = -5.0;
pub const Y_MAX: f64 = PLOT_HEIGHT as f64 / PLOT_WIDTH as f64 * X_MAX;
pub const Y_MIN: f64 = PLOT_HEIGHT as f64 / PLOT_WIDTH as f64 * X_MIN;
pub const Z_MAX: f64 = 5.0;
pub const Z_MIN: f64 = -5.0;
pub const EQUALITY_ERROR_MARGIN: f64 = 0.035;

/// Knobs that the command line may override.
#[derive(Debug, Clone)]
pub struct Config {
    pub mem_size: usize,
    pub num_registers: usize,
    pub single_out: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            mem_size: MEM_SIZE,
            num_registers: NUM_GP_REGS,
            single_out: false,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), Error> {
        let max_regs = REG_FILE_SIZE - FIRST_GP_REG;
        if self.num_registers == 0 || self.num_registers > max_regs {
            return Err(Error::Usage(format!(
                "number of registers must be between 1 and {}",
                max_regs
            )));
        }
        if self.mem_size == 0 {
            return Err(Error::Usage("memory size must be positive".to_string()));
        }
        // The frame buffer follows the heap; both must be 32-bit addressable.
        let max_mem = (1u64 << 32) - (PLOT_WIDTH * PLOT_HEIGHT) as u64;
        if self.mem_size as u64 > max_mem {
            return Err(Error::Usage(format!("memory size must be at most {} words", max_mem)));
        }
        Ok(())
    }
}

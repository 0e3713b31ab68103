//! Peripheral base addresses

pub const TIM2: u32 = 0x4000_0000;
pub const TIM3: u32 = 0x4000_0400;
pub const TIM6: u32 = 0x4000_1000;
pub const TIM7: u32 = 0x4000_1400;
pub const TIM14: u32 = 0x4000_2000;
pub const RTC: u32 = 0x4000_2800;
pub const SPI2: u32 = 0x4000_3800;
pub const I2C1: u32 = 0x4000_5400;
pub const I2C2: u32 = 0x4000_5800;
pub const PWR: u32 = 0x4000_7000;

pub const EXTI: u32 = 0x4001_0400;
pub const ADC1: u32 = 0x4001_2400;
pub const ADC_COMMON: u32 = 0x4001_2708;
pub const TIM1: u32 = 0x4001_2C00;
pub const SPI1: u32 = 0x4001_3000;
pub const TIM15: u32 = 0x4001_4000;
pub const TIM16: u32 = 0x4001_4400;
pub const TIM17: u32 = 0x4001_4800;

pub const DMA1: u32 = 0x4002_0000;
pub const RCC: u32 = 0x4002_1000;
pub const FLASH: u32 = 0x4002_2000;
pub const CRC: u32 = 0x4002_3000;

pub const SYSTICK: u32 = 0xE000_E010;
pub const NVIC: u32 = 0xE000_E100;
pub const SCB: u32 = 0xE000_ED00;

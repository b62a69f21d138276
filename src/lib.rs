/*
 * This file is part of bmcfan.
 *
 * Copyright (C) 2025 bmcfan contributors
 *
 * bmcfan is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * bmcfan is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with bmcfan. If not, see <https://www.gnu.org/licenses/>.
 */

//! bmcfan - operator tools for the bmcfand closed-loop fan controller
//!
//! The control engine itself lives in `bf-core`; this crate only wires it to
//! a command line.

pub mod cli;
pub mod commands;

//! Export and restore of every parameter and optimizer-state tensor of a [`Network`].
//!
//! Tensors are named `<group>.<key>`, where group is `para` (parameters), `h`, `m` or `v`
//! (optimizer accumulators) and key is the [`ParamKey`](crate::ParamKey) short name, e.g.
//! `para.wr0` or `v.bb1`.
//!
//! # Binary container
//!
//! ```text
//! magic              8 bytes  "QNETSNP1"
//! tensor count       u64 LE
//! per tensor:
//!     name length    u64 LE
//!     name           UTF-8
//!     nrows, ncols   u64 LE each
//!     values         nrows * ncols f64, column major, native byte order
//! ```

use std::{
    collections::HashMap,
    io::{Read, Write},
};

use faer::prelude::*;

use crate::{Error, Network, Result};

const MAGIC: &[u8; 8] = b"QNETSNP1";
const MAX_NAME_LEN: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub struct NamedTensor {
    pub name: String,
    pub data: Mat<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    tensors: Vec<NamedTensor>,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NamedTensor> {
        self.tensors.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tensors.iter().map(|tensor| tensor.name.as_str())
    }

    pub fn get(&self, name: &str) -> Option<&Mat<f64>> {
        self.tensors
            .iter()
            .find(|tensor| tensor.name == name)
            .map(|tensor| &tensor.data)
    }

    pub fn write_to(&self, mut writer: impl Write) -> Result<()> {
        writer.write_all(MAGIC)?;
        write_u64(&mut writer, self.tensors.len())?;
        for tensor in &self.tensors {
            write_u64(&mut writer, tensor.name.len())?;
            writer.write_all(tensor.name.as_bytes())?;
            write_u64(&mut writer, tensor.data.nrows())?;
            write_u64(&mut writer, tensor.data.ncols())?;
            let values: Vec<f64> = (0..tensor.data.ncols())
                .flat_map(|j| (0..tensor.data.nrows()).map(move |i| (i, j)))
                .map(|(i, j)| tensor.data[(i, j)])
                .collect();
            writer.write_all(bytemuck::cast_slice(values.as_slice()))?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn read_from(mut reader: impl Read) -> Result<Self> {
        let mut magic = [0u8; 8];
        reader.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(Error::snapshot("not a snapshot (bad magic)"));
        }
        let n_tensors = read_u64(&mut reader)?;
        let mut tensors = Vec::new();
        for _ in 0..n_tensors {
            let name_len = read_u64(&mut reader)?;
            if name_len > MAX_NAME_LEN {
                return Err(Error::snapshot(format!("tensor name of {name_len} bytes")));
            }
            let mut name = vec![0u8; name_len];
            reader.read_exact(&mut name)?;
            let name = String::from_utf8(name)
                .map_err(|_| Error::snapshot("tensor name is not UTF-8"))?;
            let nrows = read_u64(&mut reader)?;
            let ncols = read_u64(&mut reader)?;
            let n_bytes = nrows
                .checked_mul(ncols)
                .and_then(|n| n.checked_mul(size_of::<f64>()))
                .ok_or_else(|| Error::snapshot(format!("`{name}`: {nrows}×{ncols} is too large")))?;
            // The header is untrusted: the buffer grows with what is actually read.
            let mut bytes = Vec::new();
            reader.by_ref().take(n_bytes as u64).read_to_end(&mut bytes)?;
            if bytes.len() != n_bytes {
                return Err(Error::snapshot(format!(
                    "`{name}`: expected {n_bytes} bytes of values, found {}",
                    bytes.len()
                )));
            }
            let values: Vec<f64> = bytemuck::pod_collect_to_vec(bytes.as_slice());
            let data = Mat::from_fn(nrows, ncols, |i, j| values[j * nrows + i]);
            tensors.push(NamedTensor { name, data });
        }
        Ok(Self { tensors })
    }
}

fn write_u64(writer: &mut impl Write, value: usize) -> Result<()> {
    writer.write_all(&(value as u64).to_le_bytes())?;
    Ok(())
}

fn read_u64(reader: &mut impl Read) -> Result<usize> {
    let mut bytes = [0u8; 8];
    reader.read_exact(&mut bytes)?;
    usize::try_from(u64::from_le_bytes(bytes))
        .map_err(|_| Error::snapshot("header value does not fit in usize"))
}

impl Network {
    /// Copies every parameter and optimizer-state tensor into a [`Snapshot`].
    pub fn export(&self) -> Snapshot {
        let state = self.optimizer_state();
        let tensors = [
            ("para", self.params()),
            ("h", &state.h),
            ("m", &state.m),
            ("v", &state.v),
        ]
        .into_iter()
        .flat_map(|(group, buffer)| {
            buffer.iter().map(move |(key, data)| NamedTensor {
                name: format!("{group}.{key}"),
                data: data.clone(),
            })
        })
        .collect();
        Snapshot { tensors }
    }

    /// Overwrites every parameter and optimizer-state tensor from `snapshot`.
    ///
    /// The snapshot must contain exactly the tensors [`export`](Self::export) produces for this
    /// topology, with the same shapes. Nothing is modified when it doesn't.
    pub fn restore(&mut self, snapshot: &Snapshot) -> Result<()> {
        let mut by_name = HashMap::with_capacity(snapshot.len());
        for tensor in snapshot.iter() {
            if by_name.insert(tensor.name.as_str(), &tensor.data).is_some() {
                return Err(Error::snapshot(format!("duplicate tensor `{}`", tensor.name)));
            }
        }

        let (params, state) = self.parts_mut();
        let mut buffers = [
            ("para", params),
            ("h", &mut state.h),
            ("m", &mut state.m),
            ("v", &mut state.v),
        ];

        let mut n_expected = 0usize;
        for (group, buffer) in buffers.iter() {
            for (key, tensor) in buffer.iter() {
                n_expected += 1;
                let name = format!("{group}.{key}");
                let Some(saved) = by_name.get(name.as_str()) else {
                    return Err(Error::snapshot(format!("missing tensor `{name}`")));
                };
                if (saved.nrows(), saved.ncols()) != (tensor.nrows(), tensor.ncols()) {
                    return Err(Error::snapshot(format!(
                        "`{name}` is {}×{}, expected {}×{}",
                        saved.nrows(),
                        saved.ncols(),
                        tensor.nrows(),
                        tensor.ncols()
                    )));
                }
            }
        }
        if n_expected != by_name.len() {
            return Err(Error::snapshot(format!(
                "{} tensors in snapshot, expected {n_expected}",
                by_name.len()
            )));
        }

        for (group, buffer) in buffers.iter_mut() {
            let keys: Vec<_> = buffer.keys().collect();
            for key in keys {
                let name = format!("{group}.{key}");
                if let Some(&saved) = by_name.get(name.as_str()) {
                    buffer[key] = saved.clone();
                }
            }
        }
        Ok(())
    }
}

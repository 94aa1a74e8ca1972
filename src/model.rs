use std::{path::Path, str::FromStr};

use json::JsonValue;

use crate::{
    datatypes::{ElementProperties, ElementType, Geometry},
    error::HeatFlowError,
};

/// Format version written to every input data block
pub const INPUT_DATA_VERSION: usize = 2;

/// Parses `value` as a number, falling back to `def_value` when it is not one
pub fn try_convert(value: &str, def_value: f64) -> f64 {
    match value.trim().parse::<f64>() {
        Ok(v) => v,
        Err(_) => def_value,
    }
}

/// The scalar model parameters that accept textual assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scalar {
    W,
    H,
    T,
    A,
    B,
    X,
    Y,
    Lx,
    Ly,
    ElSizeFactor,
    AEnd,
    BEnd,
}

impl Scalar {
    pub const ALL: [Scalar; 12] = [
        Scalar::W,
        Scalar::H,
        Scalar::T,
        Scalar::A,
        Scalar::B,
        Scalar::X,
        Scalar::Y,
        Scalar::Lx,
        Scalar::Ly,
        Scalar::ElSizeFactor,
        Scalar::AEnd,
        Scalar::BEnd,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Scalar::W => "w",
            Scalar::H => "h",
            Scalar::T => "t",
            Scalar::A => "a",
            Scalar::B => "b",
            Scalar::X => "x",
            Scalar::Y => "y",
            Scalar::Lx => "lx",
            Scalar::Ly => "ly",
            Scalar::ElSizeFactor => "el_size_factor",
            Scalar::AEnd => "a_end",
            Scalar::BEnd => "b_end",
        }
    }
}

impl FromStr for Scalar {
    type Err = HeatFlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match Scalar::ALL.iter().find(|p| p.name() == s.trim()) {
            Some(p) => Ok(*p),
            None => Err(HeatFlowError::Input(format!("Unknown model parameter '{s}'"))),
        }
    }
}

/// Which hole dimension a parameter study varies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepParameter {
    A,
    B,
}

/// Geometry, material, boundary condition and parameter study settings of
/// the heat flow model.
///
/// The hole is `a` wide and `b` high, placed `x` from the left edge and `y`
/// from the top edge of the `w` by `h` domain.
#[derive(Debug, Clone, PartialEq)]
pub struct InputData {
    version: usize,
    w: f64,
    h: f64,
    t: f64,
    a: f64,
    b: f64,
    x: f64,
    y: f64,
    lx: f64,
    ly: f64,
    ep: ElementProperties,
    loads: Vec<(i32, f64)>,
    bcs: Vec<(i32, f64)>,
    el_size_factor: f64,
    a_end: f64,
    b_end: f64,
    param_filename: String,
    param_steps: usize,
    param_a: bool,
    param_b: bool,
}

impl Default for InputData {
    fn default() -> Self {
        let a = 0.01;
        let b = 0.01;

        InputData {
            version: INPUT_DATA_VERSION,
            w: 0.1,
            h: 0.1,
            t: 1.0,
            a,
            b,
            x: 0.01,
            y: 0.01,
            lx: 1.7,
            ly: 1.7,
            ep: ElementProperties::default(),
            loads: Vec::new(),
            bcs: vec![(80, 20.0), (85, 20.0), (90, 120.0), (95, 120.0)],
            el_size_factor: 0.01,
            a_end: a + 0.01,
            b_end: b + 0.01,
            param_filename: "param".to_owned(),
            param_steps: 10,
            param_a: false,
            param_b: true,
        }
    }
}

impl InputData {
    pub fn new() -> InputData {
        InputData::default()
    }

    pub fn version(&self) -> usize {
        self.version
    }

    pub fn scalar(&self, scalar: Scalar) -> f64 {
        match scalar {
            Scalar::W => self.w,
            Scalar::H => self.h,
            Scalar::T => self.t,
            Scalar::A => self.a,
            Scalar::B => self.b,
            Scalar::X => self.x,
            Scalar::Y => self.y,
            Scalar::Lx => self.lx,
            Scalar::Ly => self.ly,
            Scalar::ElSizeFactor => self.el_size_factor,
            Scalar::AEnd => self.a_end,
            Scalar::BEnd => self.b_end,
        }
    }

    pub fn set_scalar_value(&mut self, scalar: Scalar, value: f64) {
        let field = match scalar {
            Scalar::W => &mut self.w,
            Scalar::H => &mut self.h,
            Scalar::T => &mut self.t,
            Scalar::A => &mut self.a,
            Scalar::B => &mut self.b,
            Scalar::X => &mut self.x,
            Scalar::Y => &mut self.y,
            Scalar::Lx => &mut self.lx,
            Scalar::Ly => &mut self.ly,
            Scalar::ElSizeFactor => &mut self.el_size_factor,
            Scalar::AEnd => &mut self.a_end,
            Scalar::BEnd => &mut self.b_end,
        };
        *field = value;
    }

    /// Assigns a scalar from text. Text that is not a number leaves the
    /// current value in place.
    pub fn set_scalar(&mut self, scalar: Scalar, value: &str) {
        let converted = try_convert(value, self.scalar(scalar));
        self.set_scalar_value(scalar, converted);
    }

    pub fn w(&self) -> f64 {
        self.w
    }

    pub fn set_w(&mut self, w: f64) {
        self.w = w;
    }

    pub fn h(&self) -> f64 {
        self.h
    }

    pub fn set_h(&mut self, h: f64) {
        self.h = h;
    }

    pub fn t(&self) -> f64 {
        self.t
    }

    pub fn a(&self) -> f64 {
        self.a
    }

    pub fn set_a(&mut self, a: f64) {
        self.a = a;
    }

    pub fn b(&self) -> f64 {
        self.b
    }

    pub fn set_b(&mut self, b: f64) {
        self.b = b;
    }

    pub fn x(&self) -> f64 {
        self.x
    }

    pub fn set_x(&mut self, x: f64) {
        self.x = x;
    }

    pub fn y(&self) -> f64 {
        self.y
    }

    pub fn set_y(&mut self, y: f64) {
        self.y = y;
    }

    pub fn lx(&self) -> f64 {
        self.lx
    }

    pub fn set_lx(&mut self, lx: f64) {
        self.lx = lx;
    }

    pub fn ly(&self) -> f64 {
        self.ly
    }

    pub fn set_ly(&mut self, ly: f64) {
        self.ly = ly;
    }

    pub fn el_size_factor(&self) -> f64 {
        self.el_size_factor
    }

    pub fn set_el_size_factor(&mut self, factor: f64) {
        self.el_size_factor = factor;
    }

    pub fn a_end(&self) -> f64 {
        self.a_end
    }

    pub fn set_a_end(&mut self, a_end: f64) {
        self.a_end = a_end;
    }

    pub fn b_end(&self) -> f64 {
        self.b_end
    }

    pub fn set_b_end(&mut self, b_end: f64) {
        self.b_end = b_end;
    }

    pub fn ep(&self) -> ElementProperties {
        self.ep
    }

    pub fn set_ep(&mut self, ep: ElementProperties) {
        self.ep = ep;
    }

    /// Total boundary flux per marker, as (marker, value)
    pub fn loads(&self) -> &[(i32, f64)] {
        &self.loads
    }

    pub fn loads_mut(&mut self) -> &mut Vec<(i32, f64)> {
        &mut self.loads
    }

    /// Prescribed temperature per marker, as (marker, value)
    pub fn bcs(&self) -> &[(i32, f64)] {
        &self.bcs
    }

    pub fn bcs_mut(&mut self) -> &mut Vec<(i32, f64)> {
        &mut self.bcs
    }

    pub fn param_filename(&self) -> &str {
        &self.param_filename
    }

    pub fn set_param_filename(&mut self, filename: &str) {
        self.param_filename = filename.to_owned();
    }

    pub fn param_steps(&self) -> usize {
        self.param_steps
    }

    pub fn set_param_steps(&mut self, steps: usize) {
        self.param_steps = steps;
    }

    pub fn param_a(&self) -> bool {
        self.param_a
    }

    pub fn set_param_a(&mut self, flag: bool) {
        self.param_a = flag;
        self.param_b = !flag;
    }

    pub fn param_b(&self) -> bool {
        self.param_b
    }

    pub fn set_param_b(&mut self, flag: bool) {
        self.param_b = flag;
        self.param_a = !flag;
    }

    pub fn sweep_parameter(&self) -> SweepParameter {
        if self.param_a {
            SweepParameter::A
        } else {
            SweepParameter::B
        }
    }

    /// Builds the rectangular domain with its rectangular hole.
    ///
    /// Outer bottom and right edges carry marker 80, outer top and left 85,
    /// hole bottom and right 90, hole top and left 95.
    pub fn geometry(&self) -> Result<Geometry, HeatFlowError> {
        let (w, h, a, b, x, y) = (self.w, self.h, self.a, self.b, self.x, self.y);

        if !(w > 0.0 && h > 0.0) {
            return Err(HeatFlowError::Input(format!(
                "Domain must have positive size, got w = {w}, h = {h}"
            )));
        }
        if !(a > 0.0 && b > 0.0) {
            return Err(HeatFlowError::Input(format!(
                "Hole must have positive size, got a = {a}, b = {b}"
            )));
        }
        if !(x > 0.0 && x + a < w && y > 0.0 && y + b < h) {
            return Err(HeatFlowError::Input(format!(
                "Hole at x = {x}, y = {y} with size {a} x {b} does not fit inside {w} x {h}"
            )));
        }

        let mut g = Geometry::new();

        g.point(0.0, 0.0);
        g.point(w, 0.0);
        g.point(w, h);
        g.point(0.0, h);
        g.point(x, h - y - b);
        g.point(x + a, h - y - b);
        g.point(x + a, h - y);
        g.point(x, h - y);

        g.line([0, 1], 80);
        g.line([1, 2], 80);
        g.line([2, 3], 85);
        g.line([3, 0], 85);
        g.line([4, 5], 90);
        g.line([5, 6], 90);
        g.line([6, 7], 95);
        g.line([7, 4], 95);

        g.surface(vec![0, 1, 2, 3], vec![vec![4, 5, 6, 7]]);

        Ok(g)
    }

    /// Serializes to a flat JSON object with sorted keys
    pub fn to_json(&self) -> JsonValue {
        let mut input_data = JsonValue::new_object();

        input_data["a"] = self.a.into();
        input_data["a_end"] = self.a_end.into();
        input_data["b"] = self.b.into();
        input_data["b_end"] = self.b_end.into();
        input_data["bcs"] = marker_pairs_to_json(&self.bcs);
        input_data["el_size_factor"] = self.el_size_factor.into();
        input_data["ep"] = JsonValue::Array(vec![
            self.ep.thickness.into(),
            self.ep.integration_rule.into(),
        ]);
        input_data["h"] = self.h.into();
        input_data["loads"] = marker_pairs_to_json(&self.loads);
        input_data["lx"] = self.lx.into();
        input_data["ly"] = self.ly.into();
        input_data["param_a"] = self.param_a.into();
        input_data["param_b"] = self.param_b.into();
        input_data["param_filename"] = self.param_filename.as_str().into();
        input_data["param_steps"] = self.param_steps.into();
        input_data["t"] = self.t.into();
        input_data["version"] = self.version.into();
        input_data["w"] = self.w.into();
        input_data["x"] = self.x.into();
        input_data["y"] = self.y.into();

        input_data
    }

    /// Parses a flat input data JSON object
    ///
    /// # Arguments
    /// * `input_data` - The JSON object. `h` may be missing, in which case
    ///     the default height is kept.
    pub fn from_json(input_data: &JsonValue) -> Result<InputData, HeatFlowError> {
        if !input_data.is_object() {
            return Err(HeatFlowError::Input(
                "Input data must be a JSON object".to_owned(),
            ));
        }

        let version = read_index(input_data, "version")?;
        if version > INPUT_DATA_VERSION {
            return Err(HeatFlowError::Input(format!(
                "Unsupported input data version {version}, expected at most {INPUT_DATA_VERSION}"
            )));
        }

        let mut data = InputData::default();

        data.w = read_f64(input_data, "w")?;
        if input_data.has_key("h") {
            data.h = read_f64(input_data, "h")?;
        }
        data.t = read_f64(input_data, "t")?;
        data.a = read_f64(input_data, "a")?;
        data.b = read_f64(input_data, "b")?;
        data.x = read_f64(input_data, "x")?;
        data.y = read_f64(input_data, "y")?;
        data.lx = read_f64(input_data, "lx")?;
        data.ly = read_f64(input_data, "ly")?;
        data.ep = read_element_properties(input_data, "ep")?;
        data.loads = read_marker_pairs(input_data, "loads")?;
        data.bcs = read_marker_pairs(input_data, "bcs")?;
        data.el_size_factor = read_f64(input_data, "el_size_factor")?;
        data.a_end = read_f64(input_data, "a_end")?;
        data.b_end = read_f64(input_data, "b_end")?;
        data.param_filename = read_string(input_data, "param_filename")?;
        data.param_steps = read_index(input_data, "param_steps")?;

        let param_a = read_bool(input_data, "param_a")?;
        let param_b = read_bool(input_data, "param_b")?;
        if param_a == param_b {
            println!(
                "warning: param_a and param_b are both {param_a}, sweeping {}",
                if param_a { "a" } else { "b" }
            );
        }
        if param_a {
            data.set_param_a(true);
        } else {
            data.set_param_b(true);
        }

        Ok(data)
    }

    /// Writes the input data alone to `filename`
    pub fn save(&self, filename: &Path) -> Result<(), HeatFlowError> {
        write_json_file(&self.to_json(), filename)
    }

    /// Reads input data alone from `filename`
    pub fn load(filename: &Path) -> Result<InputData, HeatFlowError> {
        InputData::from_json(&read_json_file(filename)?)
    }
}

/// Raw results of one solve. Empty until the first solve and overwritten by
/// every following one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputData {
    /// Geometry the mesh was generated from. Not persisted.
    pub geometry: Option<Geometry>,
    /// Nodal temperatures, one per degree of freedom
    pub a: Vec<f64>,
    /// Reactions, one per degree of freedom
    pub r: Vec<f64>,
    /// Nodal temperatures of each element
    pub ed: Vec<Vec<f64>>,
    /// Element heat flux `[qx, qy]`
    pub qs: Vec<[f64; 2]>,
    /// Element temperature gradient
    pub qt: Vec<[f64; 2]>,
    pub max_flow: Vec<f64>,
    /// Element heat flux padded to three components for VTK
    pub flow: Vec<[f64; 3]>,
    pub coords: Vec<[f64; 2]>,
    pub edof: Vec<Vec<usize>>,
    pub dofs_per_node: usize,
    pub el_type: Option<ElementType>,
}

impl OutputData {
    pub fn new() -> OutputData {
        OutputData::default()
    }

    pub fn is_empty(&self) -> bool {
        self.coords.is_empty() && self.edof.is_empty()
    }

    pub fn n_nodes(&self) -> usize {
        self.coords.len()
    }

    pub fn n_elements(&self) -> usize {
        self.edof.len()
    }

    /// Checks that every array agrees with the node and element counts of
    /// the mesh
    pub fn validate(&self) -> Result<(), HeatFlowError> {
        let n_dofs = self.coords.len() * self.dofs_per_node;
        let n_elements = self.edof.len();

        let el_type = match self.el_type {
            Some(t) => t,
            None => {
                return Err(HeatFlowError::Input(
                    "Output data has no element type".to_owned(),
                ))
            }
        };
        if self.dofs_per_node == 0 {
            return Err(HeatFlowError::Input(
                "Output data has zero dofs per node".to_owned(),
            ));
        }

        let dof_counts = [("a", self.a.len()), ("r", self.r.len())];
        for (name, len) in dof_counts {
            if len != n_dofs {
                return Err(HeatFlowError::Input(format!(
                    "Output field {name} has {len} entries, mesh has {n_dofs} dofs"
                )));
            }
        }

        let element_counts = [
            ("ed", self.ed.len()),
            ("qs", self.qs.len()),
            ("qt", self.qt.len()),
            ("max_flow", self.max_flow.len()),
            ("flow", self.flow.len()),
        ];
        for (name, len) in element_counts {
            if len != n_elements {
                return Err(HeatFlowError::Input(format!(
                    "Output field {name} has {len} rows, mesh has {n_elements} elements"
                )));
            }
        }

        let row_width = el_type.nodes_per_element() * self.dofs_per_node;
        for (i, (topo, values)) in std::iter::zip(&self.edof, &self.ed).enumerate() {
            if topo.len() != row_width || values.len() != row_width {
                return Err(HeatFlowError::Input(format!(
                    "Element {} does not have {row_width} dofs",
                    i + 1
                )));
            }
            if let Some(dof) = topo.iter().find(|d| **d == 0 || **d > n_dofs) {
                return Err(HeatFlowError::Input(format!(
                    "Element {} references dof {dof} outside 1..={n_dofs}",
                    i + 1
                )));
            }
        }

        Ok(())
    }

    /// Serializes to a flat JSON object with sorted keys. An empty result
    /// serializes as `{}`.
    pub fn to_json(&self) -> JsonValue {
        let mut output_data = JsonValue::new_object();

        if self.is_empty() {
            return output_data;
        }

        output_data["a"] = column_to_json(&self.a);
        output_data["coords"] = rows_to_json::<_, f64>(&self.coords);
        output_data["dofs_per_node"] = self.dofs_per_node.into();
        output_data["ed"] = rows_to_json::<_, f64>(&self.ed);
        output_data["edof"] = rows_to_json::<_, usize>(&self.edof);
        output_data["el_type"] = match self.el_type {
            Some(t) => t.code().into(),
            None => JsonValue::Null,
        };
        output_data["flow"] = rows_to_json::<_, f64>(&self.flow);
        output_data["max_flow"] = JsonValue::from(self.max_flow.clone());
        output_data["qs"] = rows_to_json::<_, f64>(&self.qs);
        output_data["qt"] = rows_to_json::<_, f64>(&self.qt);
        output_data["r"] = column_to_json(&self.r);

        output_data
    }

    /// Parses an output data JSON object. A null, empty or unsolved block
    /// yields empty output data.
    pub fn from_json(output_data: &JsonValue) -> Result<OutputData, HeatFlowError> {
        if output_data.is_null() || output_data.is_empty() {
            return Ok(OutputData::default());
        }
        if !output_data.is_object() {
            return Err(HeatFlowError::Input(
                "Output data must be a JSON object".to_owned(),
            ));
        }
        if output_data["coords"].is_null() {
            return Ok(OutputData::default());
        }

        let data = OutputData {
            geometry: None,
            a: read_column(output_data, "a")?,
            r: read_column(output_data, "r")?,
            ed: read_rows(output_data, "ed")?,
            qs: read_fixed_rows(output_data, "qs")?,
            qt: read_fixed_rows(output_data, "qt")?,
            max_flow: read_column(output_data, "max_flow")?,
            flow: read_fixed_rows(output_data, "flow")?,
            coords: read_fixed_rows(output_data, "coords")?,
            edof: read_index_rows(output_data, "edof")?,
            dofs_per_node: read_index(output_data, "dofs_per_node")?,
            el_type: Some(ElementType::from_code(read_index(output_data, "el_type")?)?),
        };

        data.validate()?;

        Ok(data)
    }
}

/// One input data record and the results of its latest solve
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Model {
    pub input_data: InputData,
    pub output_data: OutputData,
}

impl Model {
    pub fn new() -> Model {
        Model::default()
    }

    pub fn to_json(&self) -> String {
        let mut model = JsonValue::new_object();
        model["input_data"] = self.input_data.to_json();
        model["output_data"] = self.output_data.to_json();

        model.pretty(4)
    }

    /// Parses a model document. A bare input data object is accepted too.
    pub fn from_json(contents: &str) -> Result<Model, HeatFlowError> {
        let model_json = match json::parse(contents) {
            Ok(m) => m,
            Err(err) => {
                return Err(HeatFlowError::Input(format!(
                    "Error in model json: {err}"
                )))
            }
        };

        if model_json.has_key("input_data") {
            Ok(Model {
                input_data: InputData::from_json(&model_json["input_data"])?,
                output_data: OutputData::from_json(&model_json["output_data"])?,
            })
        } else if model_json.has_key("version") {
            Ok(Model {
                input_data: InputData::from_json(&model_json)?,
                output_data: OutputData::default(),
            })
        } else {
            Err(HeatFlowError::Input(
                "Model json missing input_data field".to_owned(),
            ))
        }
    }

    pub fn save(&self, filename: &Path) -> Result<(), HeatFlowError> {
        match std::fs::write(filename, self.to_json()) {
            Ok(()) => Ok(()),
            Err(err) => Err(HeatFlowError::PostProcessor(format!(
                "Unable to write model file {}: {err}",
                filename.display()
            ))),
        }
    }

    pub fn load(filename: &Path) -> Result<Model, HeatFlowError> {
        Model::from_json(&read_file(filename)?)
    }
}

fn read_file(filename: &Path) -> Result<String, HeatFlowError> {
    match std::fs::read_to_string(filename) {
        Ok(s) => Ok(s),
        Err(err) => Err(HeatFlowError::Input(format!(
            "Unable to open {}: {err}",
            filename.display()
        ))),
    }
}

fn read_json_file(filename: &Path) -> Result<JsonValue, HeatFlowError> {
    match json::parse(&read_file(filename)?) {
        Ok(v) => Ok(v),
        Err(err) => Err(HeatFlowError::Input(format!(
            "Error in json file {}: {err}",
            filename.display()
        ))),
    }
}

fn write_json_file(value: &JsonValue, filename: &Path) -> Result<(), HeatFlowError> {
    match std::fs::write(filename, value.pretty(4)) {
        Ok(()) => Ok(()),
        Err(err) => Err(HeatFlowError::PostProcessor(format!(
            "Unable to write {}: {err}",
            filename.display()
        ))),
    }
}

fn marker_pairs_to_json(pairs: &[(i32, f64)]) -> JsonValue {
    JsonValue::Array(
        pairs
            .iter()
            .map(|(marker, value)| JsonValue::Array(vec![(*marker).into(), (*value).into()]))
            .collect(),
    )
}

fn column_to_json(values: &[f64]) -> JsonValue {
    JsonValue::Array(
        values
            .iter()
            .map(|v| JsonValue::Array(vec![(*v).into()]))
            .collect(),
    )
}

fn rows_to_json<R, T>(rows: &[R]) -> JsonValue
where
    R: AsRef<[T]>,
    T: Copy + Into<JsonValue>,
{
    JsonValue::Array(
        rows.iter()
            .map(|row| JsonValue::Array(row.as_ref().iter().map(|v| (*v).into()).collect()))
            .collect(),
    )
}

fn field<'j>(json: &'j JsonValue, key: &str) -> Result<&'j JsonValue, HeatFlowError> {
    if !json.has_key(key) {
        return Err(HeatFlowError::Input(format!("Model json missing {key} field")));
    }
    Ok(&json[key])
}

/// Reads a number through its decimal text, which `str::parse` rounds
/// correctly where `JsonValue::as_f64` may be off by an ulp
fn number(value: &JsonValue, key: &str) -> Result<f64, HeatFlowError> {
    let parsed = value.as_number().map(|n| n.to_string().parse::<f64>());
    match parsed {
        Some(Ok(v)) => Ok(v),
        _ => Err(HeatFlowError::Input(format!(
            "Non-numeric value {value} in field {key}"
        ))),
    }
}

fn index(value: &JsonValue, key: &str) -> Result<usize, HeatFlowError> {
    let v = number(value, key)?;
    if v < 0.0 || v.fract() != 0.0 || v > usize::MAX as f64 {
        return Err(HeatFlowError::Input(format!(
            "Expected a non-negative integer in field {key}, got {value}"
        )));
    }
    Ok(v as usize)
}

fn array<'j>(value: &'j JsonValue, key: &str) -> Result<&'j JsonValue, HeatFlowError> {
    if !value.is_array() {
        return Err(HeatFlowError::Input(format!(
            "Expected an array in field {key}"
        )));
    }
    Ok(value)
}

fn read_f64(json: &JsonValue, key: &str) -> Result<f64, HeatFlowError> {
    number(field(json, key)?, key)
}

fn read_index(json: &JsonValue, key: &str) -> Result<usize, HeatFlowError> {
    index(field(json, key)?, key)
}

fn read_bool(json: &JsonValue, key: &str) -> Result<bool, HeatFlowError> {
    match field(json, key)?.as_bool() {
        Some(b) => Ok(b),
        None => Err(HeatFlowError::Input(format!(
            "Expected true or false in field {key}"
        ))),
    }
}

fn read_string(json: &JsonValue, key: &str) -> Result<String, HeatFlowError> {
    match field(json, key)?.as_str() {
        Some(s) => Ok(s.to_owned()),
        None => Err(HeatFlowError::Input(format!(
            "Expected a string in field {key}"
        ))),
    }
}

fn read_element_properties(json: &JsonValue, key: &str) -> Result<ElementProperties, HeatFlowError> {
    let ep = array(field(json, key)?, key)?;
    if ep.len() != 2 {
        return Err(HeatFlowError::Input(format!(
            "Field {key} must hold [thickness, integration rule]"
        )));
    }
    Ok(ElementProperties {
        thickness: number(&ep[0], key)?,
        integration_rule: index(&ep[1], key)?,
    })
}

fn read_marker_pairs(json: &JsonValue, key: &str) -> Result<Vec<(i32, f64)>, HeatFlowError> {
    let mut pairs: Vec<(i32, f64)> = Vec::new();
    for pair in array(field(json, key)?, key)?.members() {
        let pair = array(pair, key)?;
        if pair.len() != 2 {
            return Err(HeatFlowError::Input(format!(
                "Entries of {key} must be [marker, value] pairs"
            )));
        }
        let marker = match pair[0].as_i32() {
            Some(m) => m,
            None => {
                return Err(HeatFlowError::Input(format!(
                    "Non-integer marker {} in field {key}",
                    pair[0]
                )))
            }
        };
        pairs.push((marker, number(&pair[1], key)?));
    }
    Ok(pairs)
}

/// Reads `[v, ...]` or the single-column form `[[v], ...]`
fn read_column(json: &JsonValue, key: &str) -> Result<Vec<f64>, HeatFlowError> {
    let mut values: Vec<f64> = Vec::new();
    for entry in array(field(json, key)?, key)?.members() {
        if entry.is_array() {
            if entry.len() != 1 {
                return Err(HeatFlowError::Input(format!(
                    "Field {key} must be a single column"
                )));
            }
            values.push(number(&entry[0], key)?);
        } else {
            values.push(number(entry, key)?);
        }
    }
    Ok(values)
}

fn read_rows(json: &JsonValue, key: &str) -> Result<Vec<Vec<f64>>, HeatFlowError> {
    let mut rows: Vec<Vec<f64>> = Vec::new();
    for row in array(field(json, key)?, key)?.members() {
        let row = array(row, key)?;
        rows.push(
            row.members()
                .map(|v| number(v, key))
                .collect::<Result<Vec<f64>, HeatFlowError>>()?,
        );
    }
    Ok(rows)
}

fn read_fixed_rows<const N: usize>(json: &JsonValue, key: &str) -> Result<Vec<[f64; N]>, HeatFlowError> {
    read_rows(json, key)?
        .into_iter()
        .map(|row| match <[f64; N]>::try_from(row) {
            Ok(fixed) => Ok(fixed),
            Err(row) => Err(HeatFlowError::Input(format!(
                "Rows of {key} must have {N} entries, found {}",
                row.len()
            ))),
        })
        .collect()
}

fn read_index_rows(json: &JsonValue, key: &str) -> Result<Vec<Vec<usize>>, HeatFlowError> {
    let mut rows: Vec<Vec<usize>> = Vec::new();
    for row in array(field(json, key)?, key)?.members() {
        let row = array(row, key)?;
        rows.push(
            row.members()
                .map(|v| index(v, key))
                .collect::<Result<Vec<usize>, HeatFlowError>>()?,
        );
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn solved_output() -> OutputData {
        OutputData {
            geometry: None,
            a: vec![20.0, 20.0, 120.0, 70.25],
            r: vec![-1.5, 0.0, 1.5, 1e-12],
            ed: vec![vec![20.0, 20.0, 120.0, 70.25]],
            qs: vec![[-3.25, 0.125]],
            qt: vec![[1.912, -0.0735]],
            max_flow: vec![3.2524],
            flow: vec![[-3.25, 0.125, 0.0]],
            coords: vec![[0.0, 0.0], [0.1, 0.0], [0.1, 0.1], [0.0, 0.1]],
            edof: vec![vec![1, 2, 3, 4]],
            dofs_per_node: 1,
            el_type: Some(ElementType::Quad),
        }
    }

    #[test]
    fn defaults_match_reference_model() {
        let data = InputData::new();
        assert_eq!(data.version(), 2);
        assert_eq!(data.bcs(), &[(80, 20.0), (85, 20.0), (90, 120.0), (95, 120.0)]);
        assert!(data.loads().is_empty());
        assert_relative_eq!(data.a_end(), 0.02, epsilon = 1e-12);
        assert_relative_eq!(data.b_end(), 0.02, epsilon = 1e-12);
        assert_eq!(data.param_steps(), 10);
        assert_eq!(data.param_filename(), "param");
        assert_eq!(data.ep().thickness, 1.0);
        assert_eq!(data.ep().integration_rule, 2);
        assert!(!data.param_a());
        assert!(data.param_b());
    }

    #[test]
    fn sweep_flags_are_exclusive() {
        let mut data = InputData::new();
        for flag in [true, false, false, true, true] {
            data.set_param_a(flag);
            assert_eq!(data.param_a(), flag);
            assert_eq!(data.param_b(), !flag);

            data.set_param_b(flag);
            assert_eq!(data.param_b(), flag);
            assert_eq!(data.param_a(), !flag);
        }

        data.set_param_a(true);
        assert_eq!(data.sweep_parameter(), SweepParameter::A);
        data.set_param_b(true);
        assert_eq!(data.sweep_parameter(), SweepParameter::B);
    }

    #[test]
    fn malformed_text_keeps_previous_value() {
        let mut data = InputData::new();
        for scalar in Scalar::ALL {
            let before = data.scalar(scalar);
            for junk in ["", "abc", "1.2.3", "0x10", "--1"] {
                data.set_scalar(scalar, junk);
                assert_eq!(data.scalar(scalar), before, "{} changed on {junk:?}", scalar.name());
            }
        }
    }

    #[test]
    fn numeric_text_is_converted() {
        let mut data = InputData::new();
        data.set_scalar(Scalar::A, " 0.025 ");
        data.set_scalar(Scalar::Lx, "2");
        data.set_scalar(Scalar::ElSizeFactor, "5e-2");
        assert_eq!(data.a(), 0.025);
        assert_eq!(data.lx(), 2.0);
        assert_eq!(data.el_size_factor(), 0.05);
    }

    #[test]
    fn scalar_names_parse_back() {
        for scalar in Scalar::ALL {
            assert_eq!(scalar.name().parse::<Scalar>().unwrap(), scalar);
        }
        assert!("depth".parse::<Scalar>().is_err());
    }

    #[test]
    fn input_data_round_trips_through_json() {
        let mut data = InputData::new();
        data.set_w(0.2);
        data.set_h(0.15);
        data.set_a(0.1 + 0.2);
        data.set_b(1.0 / 3.0);
        data.set_x(0.02);
        data.set_y(0.04);
        data.set_lx(1.25);
        data.set_ly(0.75);
        data.set_el_size_factor(0.05);
        data.set_a_end(0.06);
        data.set_param_filename("study");
        data.set_param_steps(4);
        data.set_param_a(true);
        data.loads_mut().push((90, -12.5));
        data.bcs_mut().truncate(2);

        let text = data.to_json().pretty(4);
        let reloaded = InputData::from_json(&json::parse(&text).unwrap()).unwrap();

        assert_eq!(reloaded, data);
    }

    #[test]
    fn input_data_keys_are_sorted() {
        let json = InputData::new().to_json();
        let keys: Vec<&str> = json.entries().map(|(k, _)| k).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        assert!(keys.contains(&"h"));
    }

    #[test]
    fn missing_height_keeps_default() {
        let mut json = InputData::new().to_json();
        json.remove("h");
        json["w"] = 0.3.into();

        let data = InputData::from_json(&json).unwrap();
        assert_eq!(data.h(), 0.1);
        assert_eq!(data.w(), 0.3);
    }

    #[test]
    fn newer_version_is_rejected() {
        let mut json = InputData::new().to_json();
        json["version"] = 3.into();
        assert!(matches!(
            InputData::from_json(&json),
            Err(HeatFlowError::Input(_))
        ));
    }

    #[test]
    fn conflicting_flags_resolve_to_param_a() {
        let mut json = InputData::new().to_json();
        json["param_a"] = true.into();
        json["param_b"] = true.into();
        let data = InputData::from_json(&json).unwrap();
        assert!(data.param_a());
        assert!(!data.param_b());
    }

    #[test]
    fn geometry_places_hole_from_top_left() {
        let g = InputData::new().geometry().unwrap();

        assert_eq!(g.points.len(), 8);
        assert_eq!(g.segments.len(), 8);
        assert_eq!(g.markers(), vec![80, 85, 90, 95]);

        let p4 = g.points[4];
        let p6 = g.points[6];
        assert_relative_eq!(p4.x, 0.01, epsilon = 1e-12);
        assert_relative_eq!(p4.y, 0.08, epsilon = 1e-12);
        assert_relative_eq!(p6.x, 0.02, epsilon = 1e-12);
        assert_relative_eq!(p6.y, 0.09, epsilon = 1e-12);

        assert_eq!(g.surfaces[0].outer, vec![0, 1, 2, 3]);
        assert_eq!(g.surfaces[0].holes, vec![vec![4, 5, 6, 7]]);
    }

    #[test]
    fn geometry_rejects_hole_outside_domain() {
        let mut data = InputData::new();
        data.set_a(0.095);
        assert!(matches!(data.geometry(), Err(HeatFlowError::Input(_))));

        let mut data = InputData::new();
        data.set_b(0.0);
        assert!(data.geometry().is_err());
    }

    #[test]
    fn output_data_round_trips_through_json() {
        let mut output = solved_output();
        output.a[3] = 1.0 / 3.0;
        output.r[1] = 0.1 + 0.2;
        output.qt[0][0] = f64::sqrt(2.0) * 100.0;
        output.max_flow[0] = std::f64::consts::PI;
        output.coords[2] = [0.7 * 0.1, 119.29697080967922];

        let text = output.to_json().pretty(4);
        let reloaded = OutputData::from_json(&json::parse(&text).unwrap()).unwrap();

        assert_eq!(reloaded, output);
    }

    #[test]
    fn computed_values_survive_json_exactly() {
        let mut state: u64 = 0x2545_f491_4f6c_dd1d;
        let mut data = InputData::new();
        for _ in 0..2000 {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let value = (state >> 11) as f64 / (1u64 << 53) as f64 * 120.0;

            data.set_a(value);
            data.set_lx(1.0 / (value + 1.0));
            let reloaded = InputData::from_json(&data.to_json()).unwrap();
            assert_eq!(reloaded.a(), data.a());
            assert_eq!(reloaded.lx(), data.lx());
        }
    }

    #[test]
    fn flat_columns_are_accepted() {
        let mut json = solved_output().to_json();
        json["a"] = JsonValue::from(vec![1.0, 2.0, 3.0, 4.0]);
        let output = OutputData::from_json(&json).unwrap();
        assert_eq!(output.a, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn inconsistent_output_is_rejected() {
        let mut json = solved_output().to_json();
        json["max_flow"] = JsonValue::from(vec![1.0, 2.0]);
        assert!(matches!(
            OutputData::from_json(&json),
            Err(HeatFlowError::Input(_))
        ));

        let mut output = solved_output();
        output.edof[0][3] = 9;
        assert!(output.validate().is_err());
    }

    #[test]
    fn empty_output_serializes_as_empty_object() {
        let json = OutputData::new().to_json();
        assert!(json.is_object());
        assert!(json.is_empty());
        assert!(OutputData::from_json(&json).unwrap().is_empty());
        assert!(OutputData::from_json(&JsonValue::Null).unwrap().is_empty());
    }

    #[test]
    fn unsolved_null_fields_load_as_empty() {
        let mut json = JsonValue::new_object();
        for key in ["a", "coords", "ed", "edof", "r"] {
            json[key] = JsonValue::Null;
        }
        assert!(OutputData::from_json(&json).unwrap().is_empty());
    }

    #[test]
    fn model_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");

        let mut model = Model::new();
        model.input_data.set_b(0.035);
        model.output_data = solved_output();
        model.save(&path).unwrap();

        let reloaded = Model::load(&path).unwrap();
        assert_eq!(reloaded.input_data, model.input_data);
        assert_eq!(reloaded.output_data.edof, model.output_data.edof);
        assert_eq!(reloaded.output_data.a.len(), 4);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("\n    \"input_data\": {"));
    }

    #[test]
    fn bare_input_data_file_loads_as_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.json");

        let mut data = InputData::new();
        data.set_x(0.03);
        data.save(&path).unwrap();

        let model = Model::load(&path).unwrap();
        assert_eq!(model.input_data, data);
        assert!(model.output_data.is_empty());
        assert_eq!(InputData::load(&path).unwrap(), data);
    }

    #[test]
    fn malformed_model_json_is_an_input_error() {
        assert!(matches!(
            Model::from_json("{ \"input_data\": "),
            Err(HeatFlowError::Input(_))
        ));
        assert!(matches!(
            Model::from_json("{}"),
            Err(HeatFlowError::Input(_))
        ));
        assert!(matches!(
            Model::load(Path::new("/nonexistent/model.json")),
            Err(HeatFlowError::Input(_))
        ));
    }
}

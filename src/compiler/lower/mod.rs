//! The lowerer: walks a typed shader AST and emits per-stage GLSL text plus
//! a structured description of the resource interface.

use std::cell::Cell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use anyhow::{anyhow, bail, Result};
use log::debug;

use crate::compiler::common::ConstantValue;
use crate::compiler::lang::ast::*;
use crate::compiler::lang::parse::{self, CompileInfo, GlobalTypeFn};
use crate::compiler::lang::{
    ArgumentQualifier, DataType, Interpolation, Precision, ShaderMode, TextureFilter,
    TextureRepeat, UniformHint, UniformScope, LEGACY_BUILTIN_FUNCS,
};
use crate::compiler::CompileError;

pub mod layout;

pub const STAGE_MAX: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Vertex = 0,
    Fragment = 1,
    Compute = 2,
}

/// Per-invocation identifier actions; flag cells are shared with the caller
/// and flipped on first use of the named identifier.
#[derive(Default)]
pub struct IdentifierActions {
    pub entry_point_stages: HashMap<String, Stage>,
    pub render_mode_values: HashMap<String, (Rc<Cell<i32>>, i32)>,
    pub render_mode_flags: HashMap<String, Rc<Cell<bool>>>,
    pub usage_flag_pointers: HashMap<String, Rc<Cell<bool>>>,
    pub write_flag_pointers: HashMap<String, Rc<Cell<bool>>>,
    /// Collector for the uniforms the shader declares.
    pub uniforms: HashMap<String, Uniform>,
}

/// Static per-render-target actions fixed at initialization.
#[derive(Debug, Clone, Default)]
pub struct DefaultIdentifierActions {
    pub renames: HashMap<String, String>,
    pub render_mode_defines: HashMap<String, String>,
    pub usage_defines: HashMap<String, String>,
    pub custom_samplers: HashMap<String, String>,
    pub default_filter: TextureFilter,
    pub default_repeat: TextureRepeat,
    pub base_texture_binding_index: u32,
    pub texture_layout_set: u32,
    pub base_uniform_string: String,
    pub global_buffer_array_variable: String,
    pub instance_uniform_index_variable: String,
    pub base_varying_index: u32,
    pub apply_luminance_multiplier: bool,
    pub check_multiview_samplers: bool,
    /// GL-style targets sample textures directly instead of pairing a
    /// separate texture with a sampler object.
    pub is_low_end: bool,
}

#[derive(Debug, Clone, Default)]
pub struct TextureUniform {
    pub name: String,
    pub datatype: DataType,
    pub hint: UniformHint,
    pub use_color: bool,
    pub filter: TextureFilter,
    pub repeat: TextureRepeat,
    pub global: bool,
    pub array_size: u32,
}

#[derive(Debug, Clone, Default)]
pub struct GeneratedCode {
    pub defines: Vec<String>,
    pub texture_uniforms: Vec<TextureUniform>,
    pub uniform_offsets: Vec<u32>,
    pub uniform_total_size: u32,
    pub uniforms: String,
    pub stage_globals: [String; STAGE_MAX],
    pub code: HashMap<String, String>,
    pub uses_fragment_time: bool,
    pub uses_vertex_time: bool,
    pub uses_global_textures: bool,
    pub uses_screen_texture_mipmaps: bool,
    pub uses_screen_texture: bool,
    pub uses_depth_texture: bool,
    pub uses_normal_roughness_texture: bool,
}

pub struct ShaderCompiler {
    actions: DefaultIdentifierActions,
    time_name: String,
    internal_functions: HashSet<&'static str>,
    texture_functions: HashSet<&'static str>,
    global_type_func: Option<GlobalTypeFn>,
}

const TEXTURE_FUNCTIONS: &[&str] = &[
    "texture",
    "textureProj",
    "textureLod",
    "textureProjLod",
    "textureGrad",
    "textureProjGrad",
    "textureGather",
    "textureSize",
    "textureQueryLod",
    "textureQueryLevels",
    "texelFetch",
];

const SAMPLER_NAMES: [&str; 12] = [
    "SAMPLER_NEAREST_CLAMP",
    "SAMPLER_LINEAR_CLAMP",
    "SAMPLER_NEAREST_WITH_MIPMAPS_CLAMP",
    "SAMPLER_LINEAR_WITH_MIPMAPS_CLAMP",
    "SAMPLER_NEAREST_WITH_MIPMAPS_ANISOTROPIC_CLAMP",
    "SAMPLER_LINEAR_WITH_MIPMAPS_ANISOTROPIC_CLAMP",
    "SAMPLER_NEAREST_REPEAT",
    "SAMPLER_LINEAR_REPEAT",
    "SAMPLER_NEAREST_WITH_MIPMAPS_REPEAT",
    "SAMPLER_LINEAR_WITH_MIPMAPS_REPEAT",
    "SAMPLER_NEAREST_WITH_MIPMAPS_ANISOTROPIC_REPEAT",
    "SAMPLER_LINEAR_WITH_MIPMAPS_ANISOTROPIC_REPEAT",
];

fn mktab(level: usize) -> String {
    "\t".repeat(level)
}

/// Namespaces user identifiers; double underscores are reserved in GLSL.
fn mkid(id: &str) -> String {
    let id = format!("m_{}", id.replace("__", "_dus_"));
    id.replace("__", "_dus_")
}

fn constr(is_const: bool) -> &'static str {
    if is_const {
        "const "
    } else {
        ""
    }
}

fn interpstr(interpolation: Interpolation) -> &'static str {
    match interpolation {
        Interpolation::Flat => "flat ",
        _ => "",
    }
}

fn prestr(precision: Precision, force_highp: bool) -> &'static str {
    match precision {
        Precision::Low => "lowp ",
        Precision::Mid => "mediump ",
        Precision::High => "highp ",
        Precision::Default => {
            if force_highp {
                "highp "
            } else {
                ""
            }
        }
    }
}

fn qualstr(qualifier: ArgumentQualifier) -> &'static str {
    match qualifier {
        ArgumentQualifier::In => "",
        ArgumentQualifier::Out => "out ",
        ArgumentQualifier::InOut => "inout ",
    }
}

fn float_str(value: f64) -> String {
    crate::compiler::lang::token::float_text(value)
}

fn constant_text(datatype: DataType, values: &[ConstantValue]) -> Result<String> {
    let render_bool = |v: &ConstantValue| match v {
        ConstantValue::Bool(true) => "true".to_string(),
        _ => "false".to_string(),
    };
    let vector = |prefix: &str, n: usize, f: &dyn Fn(&ConstantValue) -> String| {
        let parts: Vec<String> = values.iter().map(|v| f(v)).collect();
        format!("{}{}({})", prefix, n, parts.join(","))
    };
    Ok(match datatype {
        DataType::Bool => render_bool(&values[0]),
        DataType::BVec2 | DataType::BVec3 | DataType::BVec4 => {
            let n = match datatype {
                DataType::BVec2 => 2,
                DataType::BVec3 => 3,
                _ => 4,
            };
            vector("bvec", n, &render_bool)
        }
        DataType::Int => format!("{}", values[0].as_real() as i64),
        DataType::IVec2 | DataType::IVec3 | DataType::IVec4 => {
            let n = match datatype {
                DataType::IVec2 => 2,
                DataType::IVec3 => 3,
                _ => 4,
            };
            vector("ivec", n, &|v| format!("{}", v.as_real() as i64))
        }
        DataType::Uint => format!("{}u", values[0].as_real() as u64),
        DataType::UVec2 | DataType::UVec3 | DataType::UVec4 => {
            let n = match datatype {
                DataType::UVec2 => 2,
                DataType::UVec3 => 3,
                _ => 4,
            };
            vector("uvec", n, &|v| format!("{}u", v.as_real() as u64))
        }
        DataType::Float => float_str(values[0].as_real()),
        DataType::Vec2 | DataType::Vec3 | DataType::Vec4 => {
            let n = match datatype {
                DataType::Vec2 => 2,
                DataType::Vec3 => 3,
                _ => 4,
            };
            vector("vec", n, &|v| float_str(v.as_real()))
        }
        DataType::Mat2 | DataType::Mat3 | DataType::Mat4 => {
            let n = match datatype {
                DataType::Mat2 => 2,
                DataType::Mat3 => 3,
                _ => 4,
            };
            vector("mat", n, &|v| float_str(v.as_real()))
        }
        _ => bail!("constant of unsupported type {:?}", datatype),
    })
}

/// Reconstructs a typed read of a global-buffer slot.
fn global_buffer_read(buffer: &str, index: &str, datatype: DataType) -> Result<String> {
    let slot = |swizzle: &str| format!("{}[{}].{}", buffer, index, swizzle);
    let slot_at = |offset: u32, swizzle: &str| format!("{}[{}+{}u].{}", buffer, index, offset, swizzle);
    Ok(match datatype {
        DataType::Bool => format!("bool(floatBitsToUint({}))", slot("x")),
        DataType::BVec2 => format!("bvec2(floatBitsToUint({}))", slot("xy")),
        DataType::BVec3 => format!("bvec3(floatBitsToUint({}))", slot("xyz")),
        DataType::BVec4 => format!("bvec4(floatBitsToUint({}))", slot("xyzw")),
        DataType::Int => format!("floatBitsToInt({})", slot("x")),
        DataType::IVec2 => format!("floatBitsToInt({})", slot("xy")),
        DataType::IVec3 => format!("floatBitsToInt({})", slot("xyz")),
        DataType::IVec4 => format!("floatBitsToInt({})", slot("xyzw")),
        DataType::Uint => format!("floatBitsToUint({})", slot("x")),
        DataType::UVec2 => format!("floatBitsToUint({})", slot("xy")),
        DataType::UVec3 => format!("floatBitsToUint({})", slot("xyz")),
        DataType::UVec4 => format!("floatBitsToUint({})", slot("xyzw")),
        DataType::Float => format!("({})", slot("x")),
        DataType::Vec2 => format!("({})", slot("xy")),
        DataType::Vec3 => format!("({})", slot("xyz")),
        DataType::Vec4 => format!("({})", slot("xyzw")),
        DataType::Mat2 => format!("mat2({},{})", slot("xy"), slot_at(1, "xy")),
        DataType::Mat3 => format!(
            "mat3({},{},{})",
            slot("xyz"),
            slot_at(1, "xyz"),
            slot_at(2, "xyz")
        ),
        DataType::Mat4 => format!(
            "mat4({},{},{},{})",
            slot("xyzw"),
            slot_at(1, "xyzw"),
            slot_at(2, "xyzw"),
            slot_at(3, "xyzw")
        ),
        _ => bail!("global uniform of unsupported type {:?}", datatype),
    })
}

/// Built-in functions with out/inout parameters, by zero-based argument
/// index.
fn is_builtin_func_out_parameter(name: &str, arg: usize) -> bool {
    match name {
        "modf" | "frexp" => arg == 1,
        "uaddCarry" | "usubBorrow" => arg == 2,
        "umulExtended" | "imulExtended" => arg == 2 || arg == 3,
        _ => false,
    }
}

impl ShaderCompiler {
    pub fn new(actions: DefaultIdentifierActions) -> Self {
        let mut internal_functions: HashSet<&'static str> = HashSet::new();
        internal_functions.extend(LEGACY_BUILTIN_FUNCS.iter().copied());
        internal_functions.extend(crate::compiler::lang::new_builtin_funcs().iter().copied());
        Self {
            actions,
            time_name: "TIME".to_string(),
            internal_functions,
            texture_functions: TEXTURE_FUNCTIONS.iter().copied().collect(),
            global_type_func: None,
        }
    }

    pub fn with_global_type_func(mut self, func: GlobalTypeFn) -> Self {
        self.global_type_func = Some(func);
        self
    }

    fn typestr(&self, datatype: DataType) -> String {
        let name = datatype.name();
        if !self.actions.is_low_end && datatype.is_sampler() {
            // Vulkan GLSL separates textures from sampler objects.
            name.replace("sampler", "texture")
        } else {
            name.to_string()
        }
    }

    fn sampler_name(&self, filter: TextureFilter, repeat: TextureRepeat) -> Result<String> {
        let filter = if filter == TextureFilter::Default {
            if self.actions.default_filter == TextureFilter::Default {
                bail!("sampler filter default is unresolved");
            }
            self.actions.default_filter
        } else {
            filter
        };
        let repeat = if repeat == TextureRepeat::Default {
            if self.actions.default_repeat == TextureRepeat::Default {
                bail!("sampler repeat default is unresolved");
            }
            self.actions.default_repeat
        } else {
            repeat
        };
        let filter_index = match filter {
            TextureFilter::Nearest => 0,
            TextureFilter::Linear => 1,
            TextureFilter::NearestMipmap => 2,
            TextureFilter::LinearMipmap => 3,
            TextureFilter::NearestMipmapAnisotropic => 4,
            TextureFilter::LinearMipmapAnisotropic => 5,
            TextureFilter::Default => unreachable!(),
        };
        let repeat_offset = if repeat == TextureRepeat::Enable { 6 } else { 0 };
        Ok(SAMPLER_NAMES[filter_index + repeat_offset].to_string())
    }

    /// Compiles `source` for `mode`, producing the GLSL artifacts and
    /// resource metadata in one pass over the AST.
    pub fn compile(
        &self,
        mode: ShaderMode,
        source: &str,
        actions: &mut IdentifierActions,
        path: &str,
    ) -> Result<GeneratedCode, CompileError> {
        let mut info = CompileInfo::new(mode);
        info.global_type_func = self.global_type_func;
        let shader = parse::parse(source, &info).map_err(|e| CompileError::Parse {
            path: path.to_string(),
            line: e.line,
            message: e.message,
        })?;
        debug!(
            "lowering shader: {} uniforms, {} functions",
            shader.uniforms.len(),
            shader.functions.len()
        );

        let mut emitter = Emitter {
            compiler: self,
            shader: &shader,
            actions,
            gen: GeneratedCode::default(),
            current_func_name: String::new(),
            fragment_varyings: HashSet::new(),
            used_name_defines: HashSet::new(),
            used_flag_pointers: HashSet::new(),
            used_rmode_defines: HashSet::new(),
        };
        emitter
            .dump_shader()
            .map_err(|e| CompileError::Invariant(e.to_string()))?;
        Ok(emitter.gen)
    }
}

struct Emitter<'a> {
    compiler: &'a ShaderCompiler,
    shader: &'a ShaderNode,
    actions: &'a mut IdentifierActions,
    gen: GeneratedCode,
    current_func_name: String,
    fragment_varyings: HashSet<String>,
    used_name_defines: HashSet<String>,
    used_flag_pointers: HashSet<String>,
    used_rmode_defines: HashSet<String>,
}

impl<'a> Emitter<'a> {
    fn defaults(&self) -> &DefaultIdentifierActions {
        &self.compiler.actions
    }

    fn in_entry_stage(&self, stage: Stage) -> bool {
        self.actions
            .entry_point_stages
            .get(&self.current_func_name)
            .map(|s| *s == stage)
            .unwrap_or(false)
    }

    fn dump_shader(&mut self) -> Result<()> {
        let shader = self.shader;
        for mode in &shader.render_modes {
            if let Some(define) = self.defaults().render_mode_defines.get(mode) {
                if !self.used_rmode_defines.contains(mode) {
                    if !self.gen.defines.contains(define) {
                        self.gen.defines.push(define.clone());
                    }
                    self.used_rmode_defines.insert(mode.clone());
                }
            }
            if let Some(flag) = self.actions.render_mode_flags.get(mode) {
                flag.set(true);
            }
            if let Some((cell, value)) = self.actions.render_mode_values.get(mode) {
                cell.set(*value);
            }
        }

        // Structs go into every stage prelude.
        for info in &shader.structs {
            let mut struct_code = String::new();
            struct_code += "struct ";
            struct_code += &mkid(&info.name);
            struct_code += " {\n";
            for member in &info.shader_struct.members {
                if member.datatype == DataType::Struct {
                    struct_code += &mkid(&member.struct_name);
                } else {
                    struct_code += prestr(member.precision, false);
                    struct_code += &self.compiler.typestr(member.datatype);
                }
                struct_code += " ";
                struct_code += &member.name;
                if member.array_size > 0 {
                    struct_code += &format!("[{}]", member.array_size);
                }
                struct_code += ";\n";
            }
            struct_code += "};\n";
            for stage_global in self.gen.stage_globals.iter_mut() {
                *stage_global += &struct_code;
            }
        }

        let mut max_texture_uniforms = 0;
        let mut max_uniforms = 0;
        for uniform in shader.uniforms.values() {
            if uniform.datatype.is_sampler() {
                if matches!(
                    uniform.hint,
                    UniformHint::ScreenTexture
                        | UniformHint::NormalRoughnessTexture
                        | UniformHint::DepthTexture
                ) {
                    continue;
                }
                max_texture_uniforms += 1;
            } else {
                if uniform.scope == UniformScope::Instance {
                    continue;
                }
                max_uniforms += 1;
            }
        }
        self.gen
            .texture_uniforms
            .resize(max_texture_uniforms, TextureUniform::default());

        let mut uniform_sizes = vec![0u32; max_uniforms];
        let mut uniform_alignments = vec![0u32; max_uniforms];
        let mut uniform_defines = vec![String::new(); max_uniforms];

        // BTreeMap iteration is name-sorted, keeping output deterministic.
        for (uniform_name, uniform) in &shader.uniforms {
            if uniform.scope == UniformScope::Instance {
                self.actions
                    .uniforms
                    .insert(uniform_name.clone(), uniform.clone());
                continue;
            }
            if matches!(
                uniform.hint,
                UniformHint::ScreenTexture
                    | UniformHint::NormalRoughnessTexture
                    | UniformHint::DepthTexture
            ) {
                continue;
            }

            let mut ucode = String::new();
            if uniform.datatype.is_sampler() {
                if !self.defaults().is_low_end {
                    ucode = format!(
                        "layout(set = {}, binding = {}) ",
                        self.defaults().texture_layout_set,
                        self.defaults().base_texture_binding_index + uniform.texture_binding
                    );
                }
                ucode += "uniform ";
            }

            let is_buffer_global =
                !uniform.datatype.is_sampler() && uniform.scope == UniformScope::Global;
            if is_buffer_global {
                // Globals are indices into the global parameter table.
                ucode += &self.compiler.typestr(DataType::Uint);
            } else {
                ucode += prestr(uniform.precision, uniform.datatype.is_float_type());
                ucode += &self.compiler.typestr(uniform.datatype);
            }
            ucode += " ";
            ucode += &mkid(uniform_name);
            if uniform.array_size > 0 {
                ucode += &format!("[{}]", uniform.array_size);
            }
            ucode += ";\n";

            if uniform.datatype.is_sampler() {
                for stage_global in self.gen.stage_globals.iter_mut() {
                    *stage_global += &ucode;
                }
                let texture = TextureUniform {
                    name: uniform_name.clone(),
                    datatype: uniform.datatype,
                    hint: uniform.hint,
                    use_color: uniform.use_color,
                    filter: uniform.filter,
                    repeat: uniform.repeat,
                    global: uniform.scope == UniformScope::Global,
                    array_size: uniform.array_size,
                };
                if texture.global {
                    self.gen.uses_global_textures = true;
                }
                let order = uniform.texture_order;
                if order < 0 || order as usize >= self.gen.texture_uniforms.len() {
                    bail!("sampler '{}' has no texture order", uniform_name);
                }
                self.gen.texture_uniforms[order as usize] = texture;
            } else {
                let order = uniform.order;
                if order < 0 || order as usize >= max_uniforms {
                    bail!("uniform '{}' has no buffer order", uniform_name);
                }
                let order = order as usize;
                uniform_defines[order] = ucode;
                if is_buffer_global {
                    uniform_sizes[order] = layout::size_of(DataType::Uint, 0);
                    uniform_alignments[order] = layout::align_of(DataType::Uint, 0);
                } else {
                    uniform_sizes[order] = layout::size_of(uniform.datatype, uniform.array_size);
                    uniform_alignments[order] =
                        layout::align_of(uniform.datatype, uniform.array_size);
                }
            }

            self.actions
                .uniforms
                .insert(uniform_name.clone(), uniform.clone());
        }

        for define in &uniform_defines {
            self.gen.uniforms += define;
        }
        let entries: Vec<(u32, u32)> = uniform_sizes
            .iter()
            .copied()
            .zip(uniform_alignments.iter().copied())
            .collect();
        let packed = layout::pack(&entries);
        self.gen.uniform_offsets = packed.offsets;
        self.gen.uniform_total_size = packed.total_size;

        // Varyings: interpolated ones get consecutive locations; fragment
        // and fragment-to-light varyings collect into the frag_to_light
        // struct instead.
        let mut index = self.defaults().base_varying_index;
        let mut var_frag_to_light: Vec<(&String, &Varying)> = Vec::new();
        for (varying_name, varying) in &shader.varyings {
            if matches!(
                varying.stage,
                VaryingStage::Fragment | VaryingStage::FragmentToLight
            ) {
                var_frag_to_light.push((varying_name, varying));
                self.fragment_varyings.insert(varying_name.clone());
                continue;
            }
            if matches!(varying.datatype, DataType::Void | DataType::Bool | DataType::BVec2 | DataType::BVec3 | DataType::BVec4) {
                // Boolean varyings cannot be interpolated; the parser
                // reports them, emission just skips.
                continue;
            }

            let mut vcode = String::new();
            vcode += prestr(varying.precision, varying.datatype.is_float_type());
            vcode += &self.compiler.typestr(varying.datatype);
            vcode += " ";
            vcode += &mkid(varying_name);
            let mut inc = 1u32;
            if varying.array_size > 0 {
                inc = varying.array_size;
                vcode += &format!("[{}]", varying.array_size);
            }
            match varying.datatype {
                DataType::Mat2 => inc *= 2,
                DataType::Mat3 => inc *= 3,
                DataType::Mat4 => inc *= 4,
                _ => {}
            }
            vcode += ";\n";

            let interp = interpstr(varying.interpolation);
            if !self.defaults().is_low_end {
                // GLSL ES 3.0 does not allow location qualifiers here.
                self.gen.stage_globals[Stage::Vertex as usize] +=
                    &format!("layout(location={}) ", index);
                self.gen.stage_globals[Stage::Fragment as usize] +=
                    &format!("layout(location={}) ", index);
            }
            self.gen.stage_globals[Stage::Vertex as usize] +=
                &format!("{}out {}", interp, vcode);
            self.gen.stage_globals[Stage::Fragment as usize] +=
                &format!("{}in {}", interp, vcode);
            index += inc;
        }

        if !var_frag_to_light.is_empty() {
            let mut gcode = String::from("\n\nstruct {\n");
            for (name, varying) in &var_frag_to_light {
                gcode += "\t";
                gcode += prestr(varying.precision, false);
                gcode += &self.compiler.typestr(varying.datatype);
                gcode += " ";
                gcode += &mkid(name);
                if varying.array_size > 0 {
                    gcode += &format!("[{}]", varying.array_size);
                }
                gcode += ";\n";
            }
            gcode += "} frag_to_light;\n";
            self.gen.stage_globals[Stage::Fragment as usize] += &gcode;
        }

        for constant in &shader.constants {
            let mut gcode = String::new();
            gcode += constr(true);
            gcode += prestr(constant.precision, constant.datatype.is_float_type());
            if constant.datatype == DataType::Struct {
                gcode += &mkid(&constant.type_str);
            } else {
                gcode += &self.compiler.typestr(constant.datatype);
            }
            gcode += " ";
            gcode += &mkid(&constant.name);
            if constant.array_size > 0 {
                gcode += &format!("[{}]", constant.array_size);
            }
            gcode += "=";
            gcode += &self.dump_node(&constant.initializer, 1, false, true)?;
            gcode += ";\n";
            for stage_global in self.gen.stage_globals.iter_mut() {
                *stage_global += &gcode;
            }
        }

        // Lower every function body once, then emit each entry point's
        // dependency closure into its stage.
        let mut function_code: HashMap<String, String> = HashMap::new();
        for finfo in &shader.functions {
            self.current_func_name = finfo.name.clone();
            let body = self.dump_node(&finfo.function.body, 2, false, true)?;
            function_code.insert(finfo.name.clone(), body);
        }

        let mut added_per_stage: [HashSet<String>; STAGE_MAX] = Default::default();
        for finfo in &shader.functions {
            self.current_func_name = finfo.name.clone();
            if let Some(stage) = self.actions.entry_point_stages.get(&finfo.name).copied() {
                let mut to_add = String::new();
                self.dump_function_deps(
                    &finfo.name,
                    &function_code,
                    &mut to_add,
                    &mut added_per_stage[stage as usize],
                )?;
                self.gen.stage_globals[stage as usize] += &to_add;
                self.gen
                    .code
                    .insert(finfo.name.clone(), function_code[&finfo.name].clone());
            }
        }
        self.current_func_name = String::new();
        Ok(())
    }

    /// Emits every function the entry point transitively calls, ordered
    /// alphabetically at each expansion step so output is byte-stable.
    fn dump_function_deps(
        &self,
        for_func: &str,
        func_code: &HashMap<String, String>,
        to_add: &mut String,
        added: &mut HashSet<String>,
    ) -> Result<()> {
        let finfo = self
            .shader
            .find_function(for_func)
            .ok_or_else(|| anyhow!("unknown function '{}'", for_func))?;

        let mut uses: Vec<&String> = finfo.uses_function.iter().collect();
        uses.sort();

        for used in uses {
            if added.contains(used) {
                continue;
            }
            self.dump_function_deps(used, func_code, to_add, added)?;

            let fnode = &self
                .shader
                .find_function(used)
                .ok_or_else(|| anyhow!("unknown function '{}'", used))?
                .function;

            *to_add += "\n";
            let mut header = String::new();
            if fnode.return_type == DataType::Struct {
                header += &mkid(&fnode.return_struct_name);
            } else {
                header += &self.compiler.typestr(fnode.return_type);
            }
            if fnode.return_array_size > 0 {
                header += &format!("[{}]", fnode.return_array_size);
            }
            header += " ";
            header += &mkid(&fnode.name);
            header += "(";
            for (i, arg) in fnode.arguments.iter().enumerate() {
                if i > 0 {
                    header += ", ";
                }
                header += constr(arg.is_const);
                if arg.datatype == DataType::Struct {
                    header += &format!(
                        "{}{} {}",
                        qualstr(arg.qualifier),
                        mkid(&arg.struct_name),
                        mkid(&arg.name)
                    );
                } else {
                    header += &format!(
                        "{}{}{} {}",
                        qualstr(arg.qualifier),
                        prestr(arg.precision, false),
                        self.compiler.typestr(arg.datatype),
                        mkid(&arg.name)
                    );
                }
                if arg.array_size > 0 {
                    header += &format!("[{}]", arg.array_size);
                }
            }
            header += ")\n";
            *to_add += &header;
            *to_add += func_code
                .get(used)
                .ok_or_else(|| anyhow!("missing body for '{}'", used))?;

            added.insert(used.clone());
        }
        Ok(())
    }

    fn mark_time_usage(&mut self, name: &str) {
        if name == self.compiler.time_name {
            if self.in_entry_stage(Stage::Vertex) {
                self.gen.uses_vertex_time = true;
            }
            if self.in_entry_stage(Stage::Fragment) {
                self.gen.uses_fragment_time = true;
            }
        }
    }

    fn mark_usage_define(&mut self, name: &str) {
        if let Some(define) = self.defaults().usage_defines.get(name) {
            if !self.used_name_defines.contains(name) {
                let define = if let Some(stripped) = define.strip_prefix('@') {
                    self.defaults()
                        .usage_defines
                        .get(stripped)
                        .cloned()
                        .unwrap_or_default()
                } else {
                    define.clone()
                };
                // Two identifiers may trigger the same define; the list
                // stays unique.
                if !self.gen.defines.contains(&define) {
                    self.gen.defines.push(define);
                }
                self.used_name_defines.insert(name.to_string());
            }
        }
    }

    fn mark_usage_flag(&mut self, name: &str) {
        if let Some(flag) = self.actions.usage_flag_pointers.get(name) {
            if !self.used_flag_pointers.contains(name) {
                flag.set(true);
                self.used_flag_pointers.insert(name.to_string());
            }
        }
    }

    fn mark_write_flag(&mut self, name: &str) {
        if let Some(flag) = self.actions.write_flag_pointers.get(name) {
            flag.set(true);
        }
    }

    /// Emission for a named reference shared by Variable and Array nodes.
    fn reference_code(&mut self, name: &str, is_local: bool, assigning: bool) -> Result<String> {
        let shader = self.shader;
        let mut use_fragment_varying = false;
        if !is_local && !self.in_entry_stage(Stage::Vertex) {
            if assigning {
                use_fragment_varying = shader.varyings.contains_key(name);
            } else {
                use_fragment_varying = self.fragment_varyings.contains(name);
            }
        }

        if assigning {
            self.mark_write_flag(name);
        }
        self.mark_usage_define(name);
        self.mark_usage_flag(name);

        let code;
        if let Some(rename) = self.defaults().renames.get(name) {
            code = rename.clone();
        } else if let Some(uniform) = shader.uniforms.get(name) {
            if uniform.texture_order >= 0 {
                code = match uniform.hint {
                    UniformHint::ScreenTexture => {
                        if uniform.filter.uses_mipmaps() {
                            self.gen.uses_screen_texture_mipmaps = true;
                        }
                        self.gen.uses_screen_texture = true;
                        "color_buffer".to_string()
                    }
                    UniformHint::NormalRoughnessTexture => {
                        self.gen.uses_normal_roughness_texture = true;
                        "normal_roughness_buffer".to_string()
                    }
                    UniformHint::DepthTexture => {
                        self.gen.uses_depth_texture = true;
                        "depth_buffer".to_string()
                    }
                    _ => mkid(name),
                };
            } else {
                match uniform.scope {
                    UniformScope::Global => {
                        let index =
                            format!("{}{}", self.defaults().base_uniform_string, mkid(name));
                        code = global_buffer_read(
                            &self.defaults().global_buffer_array_variable,
                            &index,
                            uniform.datatype,
                        )?;
                    }
                    UniformScope::Instance => {
                        let index = format!(
                            "({}+{})",
                            self.defaults().instance_uniform_index_variable,
                            uniform.instance_index
                        );
                        code = global_buffer_read(
                            &self.defaults().global_buffer_array_variable,
                            &index,
                            uniform.datatype,
                        )?;
                    }
                    UniformScope::Local => {
                        code = format!("{}{}", self.defaults().base_uniform_string, mkid(name));
                    }
                }
            }
        } else {
            let prefix = if use_fragment_varying {
                "frag_to_light."
            } else {
                ""
            };
            code = format!("{}{}", prefix, mkid(name));
        }

        self.mark_time_usage(name);
        Ok(code)
    }

    fn dump_node(
        &mut self,
        node: &Node,
        level: usize,
        assigning: bool,
        use_scope: bool,
    ) -> Result<String> {
        let mut code = String::new();
        match node {
            Node::Block(bnode) => {
                if !bnode.single_statement {
                    code += &mktab(level - 1);
                    code += "{\n";
                }
                for (i, statement) in bnode.statements.iter().enumerate() {
                    let scode = self.dump_node(statement, level, assigning, true)?;
                    if matches!(statement, Node::ControlFlow(_)) || bnode.single_statement {
                        code += &scode;
                        if bnode.use_comma_between_statements && i + 1 < bnode.statements.len() {
                            code += ",";
                        }
                    } else {
                        code += &mktab(level);
                        code += &scode;
                        code += ";\n";
                    }
                }
                if !bnode.single_statement {
                    code += &mktab(level - 1);
                    code += "}\n";
                }
            }
            Node::VariableDeclaration(vdnode) => {
                let mut declaration = String::new();
                declaration += constr(vdnode.is_const);
                if vdnode.datatype == DataType::Struct {
                    declaration += &mkid(&vdnode.struct_name);
                } else {
                    declaration += prestr(vdnode.precision, false);
                    declaration += &self.compiler.typestr(vdnode.datatype);
                }
                declaration += " ";
                for (i, decl) in vdnode.declarations.iter().enumerate() {
                    let is_array = decl.size > 0 || decl.size_expression.is_some();
                    if i > 0 {
                        declaration += ",";
                    }
                    declaration += &mkid(&decl.name);
                    if is_array {
                        declaration += "[";
                        if let Some(size_expression) = &decl.size_expression {
                            declaration +=
                                &self.dump_node(size_expression, level, assigning, true)?;
                        } else {
                            declaration += &format!("{}", decl.size);
                        }
                        declaration += "]";
                    }
                    if !is_array || decl.single_expression {
                        if !decl.initializer.is_empty() {
                            declaration += "=";
                            declaration +=
                                &self.dump_node(&decl.initializer[0], level, assigning, true)?;
                        }
                    } else if !decl.initializer.is_empty() {
                        declaration += "=";
                        if vdnode.datatype == DataType::Struct {
                            declaration += &mkid(&vdnode.struct_name);
                        } else {
                            declaration += &self.compiler.typestr(vdnode.datatype);
                        }
                        declaration += &format!("[{}](", decl.initializer.len());
                        for (j, init) in decl.initializer.iter().enumerate() {
                            if j > 0 {
                                declaration += ",";
                            }
                            declaration += &self.dump_node(init, level, assigning, true)?;
                        }
                        declaration += ")";
                    }
                }
                code += &declaration;
            }
            Node::Variable(vnode) => {
                code += &self.reference_code(&vnode.name, vnode.is_local, assigning)?;
            }
            Node::Array(anode) => {
                // Assignment through the folded tail is still a write.
                let node_assigning = assigning || anode.assign_expression.is_some();
                code += &self.reference_code(&anode.name, anode.is_local, node_assigning)?;
                if let Some(call) = &anode.call_expression {
                    code += ".";
                    code += &self.dump_node(call, level, assigning, false)?;
                } else if let Some(index) = &anode.index_expression {
                    code += "[";
                    code += &self.dump_node(index, level, assigning, true)?;
                    code += "]";
                } else if let Some(assign) = &anode.assign_expression {
                    code += "=";
                    code += &self.dump_node(assign, level, true, false)?;
                }
            }
            Node::ArrayConstruct(acnode) => {
                if acnode.datatype == DataType::Struct {
                    code += &mkid(&acnode.struct_name);
                } else {
                    code += &self.compiler.typestr(acnode.datatype);
                }
                code += &format!("[{}](", acnode.initializer.len());
                for (i, init) in acnode.initializer.iter().enumerate() {
                    code += &self.dump_node(init, level, assigning, true)?;
                    if i + 1 < acnode.initializer.len() {
                        code += ", ";
                    }
                }
                code += ")";
            }
            Node::Constant(cnode) => {
                if cnode.array_size == 0 {
                    code += &constant_text(cnode.datatype, &cnode.values)?;
                } else {
                    if cnode.datatype == DataType::Struct {
                        code += &mkid(&cnode.struct_name);
                    } else {
                        code += &self.compiler.typestr(cnode.datatype);
                    }
                    code += &format!("[{}](", cnode.array_size);
                    let empty = Vec::new();
                    let inits = cnode
                        .array_declarations
                        .first()
                        .map(|d| &d.initializer)
                        .unwrap_or(&empty);
                    for (i, init) in inits.iter().enumerate() {
                        if i > 0 {
                            code += ",";
                        }
                        code += &self.dump_node(init, level, assigning, true)?;
                    }
                    code += ")";
                }
            }
            Node::Operator(onode) => {
                code += &self.dump_operator(onode, level, assigning, use_scope)?;
            }
            Node::ControlFlow(cfnode) => {
                code += &self.dump_control_flow(cfnode, level, assigning)?;
            }
            Node::Member(mnode) => {
                code += &self.dump_node(&mnode.owner, level, assigning, true)?;
                code += ".";
                code += &mnode.name;
                if let Some(index) = &mnode.index_expression {
                    code += "[";
                    code += &self.dump_node(index, level, assigning, true)?;
                    code += "]";
                } else if let Some(assign) = &mnode.assign_expression {
                    code += "=";
                    code += &self.dump_node(assign, level, true, false)?;
                } else if let Some(call) = &mnode.call_expression {
                    code += ".";
                    code += &self.dump_node(call, level, assigning, false)?;
                }
            }
        }
        Ok(code)
    }

    fn dump_operator(
        &mut self,
        onode: &OperatorNode,
        level: usize,
        assigning: bool,
        use_scope: bool,
    ) -> Result<String> {
        let mut code = String::new();
        match onode.op {
            op if op.is_assignment() => {
                code += &self.dump_node(&onode.arguments[0], level, true, true)?;
                code += op.text();
                code += &self.dump_node(&onode.arguments[1], level, assigning, true)?;
            }
            Operator::BitInvert | Operator::Negate | Operator::Not | Operator::Decrement
            | Operator::Increment => {
                code += onode.op.text();
                code += &self.dump_node(&onode.arguments[0], level, assigning, true)?;
            }
            Operator::PostDecrement | Operator::PostIncrement => {
                code += &self.dump_node(&onode.arguments[0], level, assigning, true)?;
                code += onode.op.text();
            }
            Operator::Call | Operator::Construct | Operator::StructConstruct => {
                code += &self.dump_call(onode, level, assigning)?;
            }
            Operator::Index => {
                code += &self.dump_node(&onode.arguments[0], level, assigning, true)?;
                code += "[";
                code += &self.dump_node(&onode.arguments[1], level, assigning, true)?;
                code += "]";
            }
            Operator::Select => {
                code += "(";
                code += &self.dump_node(&onode.arguments[0], level, assigning, true)?;
                code += "?";
                code += &self.dump_node(&onode.arguments[1], level, assigning, true)?;
                code += ":";
                code += &self.dump_node(&onode.arguments[2], level, assigning, true)?;
                code += ")";
            }
            Operator::Empty => {}
            op => {
                if use_scope {
                    code += "(";
                }
                code += &self.dump_node(&onode.arguments[0], level, assigning, true)?;
                code += " ";
                code += op.text();
                code += " ";
                code += &self.dump_node(&onode.arguments[1], level, assigning, true)?;
                if use_scope {
                    code += ")";
                }
            }
        }
        Ok(code)
    }

    fn dump_call(
        &mut self,
        onode: &OperatorNode,
        level: usize,
        assigning: bool,
    ) -> Result<String> {
        let mut code = String::new();
        let shader = self.shader;
        let vnode = match &onode.arguments[0] {
            Node::Variable(vnode) => vnode,
            _ => bail!("call target is not an identifier"),
        };
        let is_internal_func = self.compiler.internal_functions.contains(vnode.name.as_str());
        let func = if is_internal_func {
            None
        } else {
            shader.find_function(&vnode.name)
        };

        let mut is_texture_func = false;
        let mut is_screen_texture = false;
        let mut texture_func_no_uv = false;
        let mut texture_func_returns_data = false;

        match onode.op {
            Operator::StructConstruct => {
                code += &mkid(&vnode.name);
            }
            Operator::Construct => {
                code += &vnode.name;
            }
            _ => {
                self.mark_usage_flag(&vnode.name);
                if is_internal_func {
                    code += &vnode.name;
                    is_texture_func = self.compiler.texture_functions.contains(vnode.name.as_str());
                    texture_func_no_uv =
                        vnode.name == "textureSize" || vnode.name == "textureQueryLevels";
                    texture_func_returns_data =
                        texture_func_no_uv || vnode.name == "textureQueryLod";
                } else if let Some(rename) = self.defaults().renames.get(&vnode.name) {
                    code += rename;
                } else {
                    code += &mkid(&vnode.name);
                }
            }
        }
        code += "(";

        // When the color, depth or normal-roughness buffer is sampled, the
        // texture and its UV may both need multiview-aware rewriting.
        let mut multiview_uv_needed = false;
        let mut is_normal_roughness_texture = false;

        for i in 1..onode.arguments.len() {
            if i > 1 {
                code += ", ";
            }

            let mut is_out_qualifier = false;
            if is_internal_func {
                is_out_qualifier = is_builtin_func_out_parameter(&vnode.name, i - 1);
            } else if let Some(finfo) = func {
                if let Some(arg) = finfo.function.arguments.get(i - 1) {
                    is_out_qualifier = matches!(
                        arg.qualifier,
                        ArgumentQualifier::Out | ArgumentQualifier::InOut
                    );
                }
            }
            if is_out_qualifier {
                let mut target = &onode.arguments[i];
                let name = loop {
                    match target {
                        Node::Variable(v) => break Some(v.name.clone()),
                        Node::Member(m) => target = &m.owner,
                        _ => break None,
                    }
                };
                if let Some(name) = name {
                    self.mark_write_flag(&name);
                }
            }

            let node_code = self.dump_node(&onode.arguments[i], level, assigning, true)?;
            if is_texture_func && i == 1 {
                // A texture lookup; inspect the texture argument.
                let texture_uniform = match &onode.arguments[i] {
                    Node::Variable(v) => Some(v.name.clone()),
                    Node::Array(a) => Some(a.name.clone()),
                    _ => None,
                };

                if !self.defaults().is_low_end && texture_uniform.is_some() {
                    // Map the texture to a sampler object for Vulkan GLSL.
                    let texture_uniform = texture_uniform.as_deref().unwrap();
                    let mut is_depth_texture = false;
                    let sampler_name = if let Some(custom) =
                        self.defaults().custom_samplers.get(texture_uniform)
                    {
                        custom.clone()
                    } else if let Some(uniform) = shader.uniforms.get(texture_uniform) {
                        match uniform.hint {
                            UniformHint::ScreenTexture => is_screen_texture = true,
                            UniformHint::DepthTexture => is_depth_texture = true,
                            UniformHint::NormalRoughnessTexture => {
                                is_normal_roughness_texture = true
                            }
                            _ => {}
                        }
                        self.compiler.sampler_name(uniform.filter, uniform.repeat)?
                    } else {
                        // A sampler-typed function parameter; sampling state
                        // falls back to the action defaults.
                        self.compiler
                            .sampler_name(TextureFilter::Default, TextureRepeat::Default)?
                    };

                    let data_type_name = if self.defaults().check_multiview_samplers
                        && (is_screen_texture || is_depth_texture || is_normal_roughness_texture)
                    {
                        multiview_uv_needed = true;
                        "multiviewSampler".to_string()
                    } else {
                        onode.arguments[i].datatype().name().to_string()
                    };
                    code += &format!("{}({}, {})", data_type_name, node_code, sampler_name);
                } else {
                    if self.defaults().check_multiview_samplers && self.defaults().is_low_end {
                        // GL path: only need to know whether the sampled
                        // texture demands a multiview-aware UV.
                        if let Some(texture_uniform) = &texture_uniform {
                            if let Some(uniform) = shader.uniforms.get(texture_uniform) {
                                if matches!(
                                    uniform.hint,
                                    UniformHint::ScreenTexture
                                        | UniformHint::DepthTexture
                                        | UniformHint::NormalRoughnessTexture
                                ) {
                                    multiview_uv_needed = true;
                                }
                            }
                        }
                    }
                    code += &node_code;
                }
            } else if multiview_uv_needed && !texture_func_no_uv && i == 2 {
                code += &format!("multiview_uv({}.xy)", node_code);
            } else {
                code += &node_code;
            }
        }
        code += ")";
        if is_screen_texture && !texture_func_returns_data && self.defaults().apply_luminance_multiplier {
            code = format!("({} * vec4(vec3(sc_luminance_multiplier), 1.0))", code);
        }
        if is_normal_roughness_texture && !texture_func_returns_data {
            code = format!("normal_roughness_compatibility({})", code);
        }
        Ok(code)
    }

    fn dump_control_flow(
        &mut self,
        cfnode: &ControlFlowNode,
        level: usize,
        assigning: bool,
    ) -> Result<String> {
        let mut code = String::new();
        match cfnode.flow_op {
            FlowOperation::If => {
                code += &mktab(level);
                code += "if (";
                code += &self.dump_node(&cfnode.expressions[0], level, assigning, true)?;
                code += ")\n";
                code += &self.dump_node(&cfnode.blocks[0], level + 1, assigning, true)?;
                if cfnode.blocks.len() == 2 {
                    code += &mktab(level);
                    code += "else\n";
                    code += &self.dump_node(&cfnode.blocks[1], level + 1, assigning, true)?;
                }
            }
            FlowOperation::Switch => {
                code += &mktab(level);
                code += "switch (";
                code += &self.dump_node(&cfnode.expressions[0], level, assigning, true)?;
                code += ")\n";
                code += &self.dump_node(&cfnode.blocks[0], level + 1, assigning, true)?;
            }
            FlowOperation::Case => {
                code += &mktab(level);
                code += "case ";
                code += &self.dump_node(&cfnode.expressions[0], level, assigning, true)?;
                code += ":\n";
                code += &self.dump_node(&cfnode.blocks[0], level + 1, assigning, true)?;
            }
            FlowOperation::Default => {
                code += &mktab(level);
                code += "default:\n";
                code += &self.dump_node(&cfnode.blocks[0], level + 1, assigning, true)?;
            }
            FlowOperation::Do => {
                code += &mktab(level);
                code += "do";
                code += &self.dump_node(&cfnode.blocks[0], level + 1, assigning, true)?;
                code += &mktab(level);
                code += "while (";
                code += &self.dump_node(&cfnode.expressions[0], level, assigning, true)?;
                code += ");";
            }
            FlowOperation::While => {
                code += &mktab(level);
                code += "while (";
                code += &self.dump_node(&cfnode.expressions[0], level, assigning, true)?;
                code += ")\n";
                code += &self.dump_node(&cfnode.blocks[0], level + 1, assigning, true)?;
            }
            FlowOperation::For => {
                let left = self.dump_node(&cfnode.blocks[0], level, assigning, true)?;
                let middle = self.dump_node(&cfnode.blocks[1], level, assigning, true)?;
                let right = self.dump_node(&cfnode.blocks[2], level, assigning, true)?;
                code += &mktab(level);
                code += &format!("for ({};{};{})\n", left, middle, right);
                code += &self.dump_node(&cfnode.blocks[3], level + 1, assigning, true)?;
            }
            FlowOperation::Return => {
                if !cfnode.expressions.is_empty() {
                    code += "return ";
                    code += &self.dump_node(&cfnode.expressions[0], level, assigning, true)?;
                    code += ";";
                } else {
                    code += "return;";
                }
            }
            FlowOperation::Discard => {
                self.mark_usage_flag("DISCARD");
                code += "discard;";
            }
            FlowOperation::Continue => {
                code += "continue;";
            }
            FlowOperation::Break => {
                code += "break;";
            }
        }
        Ok(code)
    }
}

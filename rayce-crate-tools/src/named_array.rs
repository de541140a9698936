/// 定义一个枚举，并为每个变体关联一个值，形成一张静态表
///
/// 变体的声明顺序就是数组下标，适合描述 shader stage、shader group 这类
/// 需要同时按名字和下标访问的常量表。
///
/// ```ignore
/// enumed_map!(Stage<&'static str>: {
///     RayGen: "raygen",
///     Miss: "miss",
/// });
/// assert_eq!(Stage::Miss.index(), 1);
/// assert_eq!(*Stage::Miss.value(), "miss");
/// ```
#[macro_export]
macro_rules! enumed_map {
    ($vis:vis $enum_name:ident<$vtype:ty>: { $($variant:ident: $value:expr),* $(,)? }) => {
        #[repr(usize)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $enum_name {
            $($variant,)*
        }

        impl $enum_name {
            pub const COUNT: usize = $crate::count_indexed_array!($($variant),*);
            pub const ALL: [Self; $crate::count_indexed_array!($($variant),*)] = [$(Self::$variant,)*];

            fn get_array() -> &'static [$vtype; Self::COUNT] {
                static ARRAY: std::sync::OnceLock<[$vtype; $crate::count_indexed_array!($($variant),*)]> =
                    std::sync::OnceLock::new();
                ARRAY.get_or_init(|| [$($value,)*])
            }

            pub fn value(self) -> &'static $vtype {
                &Self::get_array()[self as usize]
            }

            pub const fn index(self) -> usize {
                self as usize
            }

            pub fn iter() -> impl Iterator<Item = Self> {
                Self::ALL.into_iter()
            }

            pub fn array() -> &'static [$vtype; Self::COUNT] {
                Self::get_array()
            }
        }
    };
}

/// 辅助宏，计算变体数量
#[macro_export]
macro_rules! count_indexed_array {
    () => (0);
    ($head:tt $(, $tail:tt)*) => (1 + $crate::count_indexed_array!($($tail),*));
}

#[cfg(test)]
mod tests {
    enumed_map!(Color<u32>: {
        Red: 0xff0000,
        Green: 0x00ff00,
        Blue: 0x0000ff,
    });

    #[test]
    fn test_enumed_map_order() {
        assert_eq!(Color::COUNT, 3);
        assert_eq!(Color::Blue.index(), 2);
        assert_eq!(*Color::Green.value(), 0x00ff00);
        assert_eq!(Color::iter().collect::<Vec<_>>(), vec![Color::Red, Color::Green, Color::Blue]);
        assert_eq!(Color::array()[0], 0xff0000);
    }
}
